// ParseError carries diagnostic spans and source fragments; boxing would lose
// the zero-copy benefit and complicate call sites throughout the crate.
#![allow(clippy::result_large_err)]

use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;
use crate::errors::{ParseDiagnostic, ParseDiagnosticSeverity, ParseError};

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct SpecParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

fn span_from(pair: &Pair<'_>) -> Span {
    let s = pair.as_span();
    Span::new(s.start(), s.end())
}

/// Extract the next child from a pest iterator, returning a descriptive error
/// instead of panicking. The grammar guarantees structure, but we prefer
/// graceful errors in the post-parse AST-building phase.
fn next_child<'a>(
    iter: &mut pest::iterators::Pairs<'a, Rule>,
    context: &str,
) -> Result<Pair<'a>, ParseError> {
    iter.next().ok_or_else(|| ParseError::MissingNode {
        context: context.to_string(),
    })
}

fn run_parser<'a>(rule: Rule, source: &'a str, filename: &str) -> Result<Pair<'a>, ParseError> {
    let mut pairs = SpecParser::parse(rule, source).map_err(|e| {
        let (start, end) = match e.location {
            pest::error::InputLocation::Pos(p) => (p, (p + 1).min(source.len().max(1))),
            pest::error::InputLocation::Span((s, e)) => (s, e),
        };
        ParseError::syntax(format!("{e}"), Span::new(start, end), source, filename)
    })?;
    pairs.next().ok_or_else(|| ParseError::MissingNode {
        context: format!("{rule:?}"),
    })
}

/// Parse a full annotation (`#if_succeeds …;`, `#invariant …;`, `#define …;`).
///
/// Spans in the result are relative to `source`; the extractor lifts them to
/// file coordinates.
pub fn parse_annotation(source: &str, filename: &str) -> Result<Annotation, ParseError> {
    let (annot, _) = parse_annotation_with_diagnostics(source, filename)?;
    Ok(annot)
}

/// Parse an annotation and collect non-fatal diagnostics (e.g. empty labels).
pub fn parse_annotation_with_diagnostics(
    source: &str,
    filename: &str,
) -> Result<(Annotation, Vec<ParseDiagnostic>), ParseError> {
    let root = run_parser(Rule::annotation, source, filename)?;
    let def = root
        .into_inner()
        .find(|p| p.as_rule() == Rule::annotation_def)
        .ok_or_else(|| ParseError::MissingNode {
            context: "annotation_def".into(),
        })?;
    let annot = build_annotation(def)?;
    let mut diagnostics = Vec::new();
    if let Some(label) = &annot.label {
        if label.is_empty() {
            diagnostics.push(ParseDiagnostic {
                code: "empty_label_message".into(),
                severity: ParseDiagnosticSeverity::Warning,
                message: "annotation label has an empty message".into(),
                suggestion: Some("drop the {:msg \"\"} label or give it text".into()),
                span: Some(annot.span),
            });
        }
    }
    Ok((annot, diagnostics))
}

/// Parse a bare specification expression.
pub fn parse_expression(source: &str, filename: &str) -> Result<Expr, ParseError> {
    let root = run_parser(Rule::expression_entry, source, filename)?;
    let expr_pair = root
        .into_inner()
        .find(|p| p.as_rule() == Rule::expression)
        .ok_or_else(|| ParseError::MissingNode {
            context: "expression".into(),
        })?;
    build_expression(expr_pair)
}

/// Parse a host-compiler type string (e.g. `mapping(address => uint256)`).
pub fn parse_type_string(source: &str, filename: &str) -> Result<SpecType, ParseError> {
    let root = run_parser(Rule::type_string_entry, source, filename)?;
    let ty_pair = root
        .into_inner()
        .find(|p| p.as_rule() == Rule::type_expr)
        .ok_or_else(|| ParseError::MissingNode {
            context: "type_expr".into(),
        })?;
    build_type(ty_pair)
}

// ---------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------

fn build_annotation(def: Pair<'_>) -> Result<Annotation, ParseError> {
    // The '#' introducer sits one byte before the definition rule.
    let def_span = span_from(&def);
    let span = Span::new(def_span.start.saturating_sub(1), def_span.end);
    let inner = next_child(&mut def.into_inner(), "annotation body")?;
    match inner.as_rule() {
        Rule::if_succeeds_annot => build_property(inner, AnnotationKind::IfSucceeds, span),
        Rule::invariant_annot => build_property(inner, AnnotationKind::Invariant, span),
        Rule::define_annot => build_define(inner, span),
        other => Err(ParseError::MissingNode {
            context: format!("annotation kind, found {other:?}"),
        }),
    }
}

fn build_property(
    pair: Pair<'_>,
    kind: AnnotationKind,
    span: Span,
) -> Result<Annotation, ParseError> {
    let mut label = None;
    let mut predicate = None;
    let mut predicate_span = span;
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::label => label = Some(label_text(child)?),
            Rule::expression => {
                predicate_span = span_from(&child);
                predicate = Some(build_expression(child)?);
            }
            _ => {}
        }
    }
    let predicate = predicate.ok_or_else(|| ParseError::MissingNode {
        context: "property predicate".into(),
    })?;
    Ok(Annotation {
        kind,
        label,
        body: AnnotationBody::Predicate(predicate),
        span,
        predicate_span,
    })
}

fn build_define(pair: Pair<'_>, span: Span) -> Result<Annotation, ParseError> {
    let mut label = None;
    let mut name = None;
    let mut params = Vec::new();
    let mut return_type = None;
    let mut body = None;
    let mut predicate_span = span;
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::label => label = Some(label_text(child)?),
            Rule::ident => name = Some(child.as_str().to_string()),
            Rule::param_list => {
                for p in child.into_inner() {
                    let mut parts = p.into_inner();
                    let ty = build_type(next_child(&mut parts, "param type")?)?;
                    let pname = next_child(&mut parts, "param name")?.as_str().to_string();
                    params.push((pname, ty));
                }
            }
            Rule::type_expr => return_type = Some(build_type(child)?),
            Rule::expression => {
                predicate_span = span_from(&child);
                body = Some(build_expression(child)?);
            }
            _ => {}
        }
    }
    let def = UserFunctionDef {
        name: name.ok_or_else(|| ParseError::MissingNode {
            context: "define name".into(),
        })?,
        params,
        return_type: return_type.ok_or_else(|| ParseError::MissingNode {
            context: "define return type".into(),
        })?,
        body: body.ok_or_else(|| ParseError::MissingNode {
            context: "define body".into(),
        })?,
        span,
    };
    Ok(Annotation {
        kind: AnnotationKind::Define,
        label,
        body: AnnotationBody::Definition(def),
        span,
        predicate_span,
    })
}

fn label_text(pair: Pair<'_>) -> Result<String, ParseError> {
    let lit = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::string_lit)
        .ok_or_else(|| ParseError::MissingNode {
            context: "label string".into(),
        })?;
    let inner = next_child(&mut lit.into_inner(), "label string contents")?;
    Ok(unescape(inner.as_str()))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------

fn build_expression(pair: Pair<'_>) -> Result<Expr, ParseError> {
    debug_assert_eq!(pair.as_rule(), Rule::expression);
    build_ternary(next_child(&mut pair.into_inner(), "ternary")?)
}

fn build_ternary(pair: Pair<'_>) -> Result<Expr, ParseError> {
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let cond = build_left_assoc(next_child(&mut inner, "condition")?)?;
    match inner.next() {
        None => Ok(cond),
        Some(then_pair) => {
            let then_branch = build_expression(then_pair)?;
            let else_branch = build_expression(next_child(&mut inner, "else branch")?)?;
            Ok(Expr::new(
                ExprKind::Conditional {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
                span,
            ))
        }
    }
}

fn binary_op_of(text: &str) -> BinaryOp {
    match text {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<=" => BinaryOp::Le,
        ">=" => BinaryOp::Ge,
        "<" => BinaryOp::Lt,
        ">" => BinaryOp::Gt,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        _ => BinaryOp::Pow,
    }
}

/// Fold a `lhs (op rhs)*` level into left-associated binary nodes. Handles
/// every precedence level below ternary; `**` folds right-associated.
fn build_left_assoc(pair: Pair<'_>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::or_expr | Rule::and_expr | Rule::eq_expr | Rule::rel_expr | Rule::add_expr
        | Rule::mul_expr => {
            let mut inner = pair.into_inner();
            let mut lhs = build_left_assoc(next_child(&mut inner, "operand")?)?;
            while let Some(op_pair) = inner.next() {
                let op = binary_op_of(op_pair.as_str());
                let rhs = build_left_assoc(next_child(&mut inner, "rhs operand")?)?;
                let span = Span::new(lhs.span.start, rhs.span.end);
                lhs = Expr::new(
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    span,
                );
            }
            Ok(lhs)
        }
        Rule::pow_expr => {
            let mut operands = Vec::new();
            for child in pair.into_inner() {
                if child.as_rule() != Rule::op_pow {
                    operands.push(build_unary(child)?);
                }
            }
            let mut rhs = operands.pop().ok_or_else(|| ParseError::MissingNode {
                context: "pow operand".into(),
            })?;
            while let Some(lhs) = operands.pop() {
                let span = Span::new(lhs.span.start, rhs.span.end);
                rhs = Expr::new(
                    ExprKind::Binary {
                        op: BinaryOp::Pow,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    span,
                );
            }
            Ok(rhs)
        }
        _ => build_unary(pair),
    }
}

fn build_unary(pair: Pair<'_>) -> Result<Expr, ParseError> {
    debug_assert_eq!(pair.as_rule(), Rule::unary_expr);
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let first = next_child(&mut inner, "unary operand")?;
    match first.as_rule() {
        Rule::op_unary => {
            let op = match first.as_str() {
                "!" => UnaryOp::Not,
                _ => UnaryOp::Neg,
            };
            let operand = build_unary(next_child(&mut inner, "unary operand")?)?;
            Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ))
        }
        Rule::postfix_expr => build_postfix(first),
        other => Err(ParseError::MissingNode {
            context: format!("unary operand, found {other:?}"),
        }),
    }
}

fn build_postfix(pair: Pair<'_>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut expr = build_primary(next_child(&mut inner, "primary")?)?;
    for suffix_wrap in inner {
        let end = span_from(&suffix_wrap).end;
        let span = Span::new(expr.span.start, end);
        let suffix = next_child(&mut suffix_wrap.into_inner(), "postfix suffix")?;
        expr = match suffix.as_rule() {
            Rule::call_suffix => {
                let mut args = Vec::new();
                if let Some(list) = suffix.into_inner().next() {
                    for a in list.into_inner() {
                        args.push(build_expression(a)?);
                    }
                }
                Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                )
            }
            Rule::index_suffix => {
                let index = build_expression(next_child(&mut suffix.into_inner(), "index")?)?;
                Expr::new(
                    ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                )
            }
            Rule::member_suffix => {
                let member = next_child(&mut suffix.into_inner(), "member name")?
                    .as_str()
                    .to_string();
                Expr::new(
                    ExprKind::Member {
                        base: Box::new(expr),
                        member,
                    },
                    span,
                )
            }
            other => {
                return Err(ParseError::MissingNode {
                    context: format!("postfix suffix, found {other:?}"),
                })
            }
        };
    }
    Ok(expr)
}

fn build_primary(pair: Pair<'_>) -> Result<Expr, ParseError> {
    let span = span_from(&pair);
    let inner = next_child(&mut pair.into_inner(), "primary")?;
    match inner.as_rule() {
        Rule::old_expr => {
            // The keyword token precedes the argument.
            let arg_pair = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::expression)
                .ok_or_else(|| ParseError::MissingNode {
                    context: "old argument".into(),
                })?;
            let arg = build_expression(arg_pair)?;
            Ok(Expr::new(ExprKind::Old(Box::new(arg)), span))
        }
        Rule::let_expr => {
            let mut name = None;
            let mut exprs = Vec::new();
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::ident => name = Some(part.as_str().to_string()),
                    Rule::expression => exprs.push(build_expression(part)?),
                    _ => {}
                }
            }
            let name = name.ok_or_else(|| ParseError::MissingNode {
                context: "let name".into(),
            })?;
            if exprs.len() != 2 {
                return Err(ParseError::MissingNode {
                    context: "let binding and body".into(),
                });
            }
            let body = exprs.pop().expect("length checked");
            let bound = exprs.pop().expect("length checked");
            Ok(Expr::new(
                ExprKind::Let {
                    name,
                    bound: Box::new(bound),
                    body: Box::new(body),
                },
                span,
            ))
        }
        Rule::quant_expr => build_quantifier(inner, span),
        Rule::cast_expr => {
            let mut parts = inner.into_inner();
            let ty_pair = next_child(&mut parts, "cast type")?;
            let ty = elementary_type(ty_pair.as_str(), span_from(&ty_pair))?;
            let arg = build_expression(next_child(&mut parts, "cast argument")?)?;
            Ok(Expr::new(
                ExprKind::Cast {
                    ty,
                    expr: Box::new(arg),
                },
                span,
            ))
        }
        Rule::paren_or_tuple => {
            let items: Vec<Expr> = inner
                .into_inner()
                .map(build_expression)
                .collect::<Result<_, _>>()?;
            if items.len() == 1 {
                Ok(items.into_iter().next().expect("length checked"))
            } else {
                Ok(Expr::new(ExprKind::Tuple(items), span))
            }
        }
        Rule::bool_lit => Ok(Expr::new(ExprKind::BoolLit(inner.as_str() == "true"), span)),
        Rule::hex_lit => {
            let text = inner.as_str();
            let digits = &text[2..];
            if digits.len() == 40 {
                Ok(Expr::new(ExprKind::AddressLit(text.to_string()), span))
            } else {
                let value = i128::from_str_radix(digits, 16)
                    .map_err(|_| ParseError::overflow(text, span))?;
                Ok(Expr::new(ExprKind::NumberLit(value), span))
            }
        }
        Rule::number => {
            let value: i128 = inner
                .as_str()
                .parse()
                .map_err(|_| ParseError::overflow(inner.as_str(), span))?;
            Ok(Expr::new(ExprKind::NumberLit(value), span))
        }
        Rule::string_lit => {
            let raw = next_child(&mut inner.into_inner(), "string contents")?;
            Ok(Expr::new(ExprKind::StringLit(unescape(raw.as_str())), span))
        }
        Rule::ident => Ok(Expr::new(ExprKind::Ident(inner.as_str().to_string()), span)),
        other => Err(ParseError::MissingNode {
            context: format!("primary, found {other:?}"),
        }),
    }
}

fn build_quantifier(pair: Pair<'_>, span: Span) -> Result<Expr, ParseError> {
    let mut quantifier = Quantifier::ForAll;
    let mut var_type = None;
    let mut var = None;
    let mut range = None;
    let mut body = None;
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::kw_forall => quantifier = Quantifier::ForAll,
            Rule::kw_exists => quantifier = Quantifier::Exists,
            Rule::type_expr => var_type = Some(build_type(child)?),
            Rule::ident => var = Some(child.as_str().to_string()),
            Rule::quant_range => {
                let r = next_child(&mut child.into_inner(), "quantifier range")?;
                range = Some(match r.as_rule() {
                    Rule::range_expr => {
                        let mut ends = r.into_inner();
                        let low = build_left_assoc(next_child(&mut ends, "range low")?)?;
                        let high = build_left_assoc(next_child(&mut ends, "range high")?)?;
                        QuantRange::IntRange {
                            low: Box::new(low),
                            high: Box::new(high),
                        }
                    }
                    Rule::expression => QuantRange::Iterable(Box::new(build_expression(r)?)),
                    other => {
                        return Err(ParseError::MissingNode {
                            context: format!("quantifier range, found {other:?}"),
                        })
                    }
                });
            }
            Rule::expression => body = Some(build_expression(child)?),
            _ => {}
        }
    }
    Ok(Expr::new(
        ExprKind::Quantified {
            quantifier,
            var_type: var_type.ok_or_else(|| ParseError::MissingNode {
                context: "quantifier binder type".into(),
            })?,
            var: var.ok_or_else(|| ParseError::MissingNode {
                context: "quantifier binder name".into(),
            })?,
            range: range.ok_or_else(|| ParseError::MissingNode {
                context: "quantifier range".into(),
            })?,
            body: Box::new(body.ok_or_else(|| ParseError::MissingNode {
                context: "quantifier body".into(),
            })?),
        },
        span,
    ))
}

// ---------------------------------------------------------------
// Host type strings
// ---------------------------------------------------------------

fn build_type(pair: Pair<'_>) -> Result<SpecType, ParseError> {
    debug_assert_eq!(pair.as_rule(), Rule::type_expr);
    let mut inner = pair.into_inner();
    let base_pair = next_child(&mut inner, "base type")?;
    let mut ty = build_base_type(base_pair)?;
    for suffix in inner {
        match suffix.as_rule() {
            Rule::array_suffix => {
                let size = match suffix.into_inner().next() {
                    Some(n) => Some(n.as_str().parse::<u64>().map_err(|_| {
                        ParseError::overflow(n.as_str(), span_from(&n))
                    })?),
                    None => None,
                };
                ty = match size {
                    Some(size) => SpecType::FixedArray {
                        elem: Box::new(ty),
                        size,
                    },
                    None => SpecType::DynArray { elem: Box::new(ty) },
                };
            }
            // Data locations do not affect the checked type.
            Rule::location => {}
            _ => {}
        }
    }
    Ok(ty)
}

fn build_base_type(pair: Pair<'_>) -> Result<SpecType, ParseError> {
    let inner = next_child(&mut pair.into_inner(), "base type")?;
    let span = span_from(&inner);
    match inner.as_rule() {
        Rule::mapping_type => {
            // Children are the keyword token plus the key and value types.
            let mut parts = inner
                .into_inner()
                .filter(|p| p.as_rule() == Rule::type_expr);
            let key_pair = parts.next().ok_or_else(|| ParseError::MissingNode {
                context: "mapping key".into(),
            })?;
            let value_pair = parts.next().ok_or_else(|| ParseError::MissingNode {
                context: "mapping value".into(),
            })?;
            Ok(SpecType::Mapping {
                key: Box::new(build_type(key_pair)?),
                value: Box::new(build_type(value_pair)?),
            })
        }
        Rule::tuple_type => {
            let items = match inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::type_list)
            {
                Some(list) => list
                    .into_inner()
                    .map(build_type)
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            Ok(SpecType::Tuple(items))
        }
        Rule::function_type => {
            let mut params = Vec::new();
            let mut returns = Vec::new();
            for child in inner.into_inner() {
                match child.as_rule() {
                    Rule::type_list => {
                        params = child
                            .into_inner()
                            .map(build_type)
                            .collect::<Result<Vec<_>, _>>()?;
                    }
                    Rule::fn_returns => {
                        let list = next_child(&mut child.into_inner(), "returns list")?;
                        returns = list
                            .into_inner()
                            .map(build_type)
                            .collect::<Result<Vec<_>, _>>()?;
                    }
                    _ => {}
                }
            }
            Ok(SpecType::Function { params, returns })
        }
        Rule::named_type => {
            let mut parts = inner.into_inner();
            let kind = next_child(&mut parts, "named type kind")?;
            let name = next_child(&mut parts, "named type name")?
                .as_str()
                .to_string();
            Ok(match kind.as_str() {
                "struct" => SpecType::Struct { name },
                "enum" => SpecType::Enum { name },
                _ => SpecType::Contract { name },
            })
        }
        Rule::meta_type => {
            let arg_pair = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::type_expr)
                .ok_or_else(|| ParseError::MissingNode {
                    context: "meta type argument".into(),
                })?;
            Ok(SpecType::TypeOf(Box::new(build_type(arg_pair)?)))
        }
        Rule::address_payable => Ok(SpecType::Address),
        Rule::elementary_type_name => elementary_type(inner.as_str(), span),
        other => Err(ParseError::MissingNode {
            context: format!("base type, found {other:?}"),
        }),
    }
}

fn elementary_type(text: &str, span: Span) -> Result<SpecType, ParseError> {
    if let Some(rest) = text.strip_prefix("uint") {
        return int_type(rest, false, text, span);
    }
    if let Some(rest) = text.strip_prefix("int") {
        return int_type(rest, true, text, span);
    }
    if let Some(rest) = text.strip_prefix("bytes") {
        if rest.is_empty() {
            return Ok(SpecType::Bytes { size: None });
        }
        let size: u8 = rest
            .parse()
            .map_err(|_| ParseError::invalid_width(text, span))?;
        if !(1..=32).contains(&size) {
            return Err(ParseError::invalid_width(text, span));
        }
        return Ok(SpecType::Bytes { size: Some(size) });
    }
    match text {
        "address" => Ok(SpecType::Address),
        "bool" => Ok(SpecType::Bool),
        "string" => Ok(SpecType::String),
        _ => Err(ParseError::invalid_width(text, span)),
    }
}

fn int_type(suffix: &str, signed: bool, full: &str, span: Span) -> Result<SpecType, ParseError> {
    if suffix.is_empty() {
        return Ok(SpecType::Int { signed, bits: 256 });
    }
    let bits: u16 = suffix
        .parse()
        .map_err(|_| ParseError::invalid_width(full, span))?;
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(ParseError::invalid_width(full, span));
    }
    Ok(SpecType::Int { signed, bits })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        parse_expression(src, "test.spec").expect("parse failed")
    }

    fn ty(src: &str) -> SpecType {
        parse_type_string(src, "test.spec").expect("type parse failed")
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    #[test]
    fn parses_precedence_standard_arithmetic() {
        assert_eq!(expr("1 + 2 * 3").to_string(), "(1 + (2 * 3))");
        assert_eq!(expr("(1 + 2) * 3").to_string(), "((1 + 2) * 3)");
        assert_eq!(expr("2 ** 3 ** 2").to_string(), "(2 ** (3 ** 2))");
    }

    #[test]
    fn comparison_binds_looser_than_arithmetic() {
        assert_eq!(expr("x + 1 >= y").to_string(), "((x + 1) >= y)");
    }

    #[test]
    fn logical_operators_bind_loosest() {
        assert_eq!(
            expr("a == b && c || d").to_string(),
            "(((a == b) && c) || d)"
        );
    }

    #[test]
    fn postfix_is_left_associative() {
        let e = expr("a.b[0].c(1, 2)");
        assert_eq!(e.to_string(), "a.b[0].c(1, 2)");
    }

    #[test]
    fn parses_conditional() {
        assert_eq!(expr("a ? b : c").to_string(), "(a ? b : c)");
    }

    #[test]
    fn parses_old_operator() {
        let e = expr("old(x) + 1");
        assert_eq!(e.to_string(), "(old(x) + 1)");
    }

    #[test]
    fn parses_let_binding() {
        let e = expr("let y := x + 1 in y * y");
        assert_eq!(e.to_string(), "(let y := (x + 1) in (y * y))");
    }

    #[test]
    fn parses_forall_with_int_range() {
        let e = expr("forall (uint256 i in 0...10) a[i] >= 0");
        match &e.kind {
            ExprKind::Quantified {
                quantifier,
                var,
                range,
                ..
            } => {
                assert_eq!(*quantifier, Quantifier::ForAll);
                assert_eq!(var, "i");
                assert!(matches!(range, QuantRange::IntRange { .. }));
            }
            other => panic!("expected quantifier, got {other:?}"),
        }
    }

    #[test]
    fn parses_exists_over_iterable() {
        let e = expr("exists (uint256 i in keys) m[keys[i]] > 0");
        match &e.kind {
            ExprKind::Quantified {
                quantifier, range, ..
            } => {
                assert_eq!(*quantifier, Quantifier::Exists);
                assert!(matches!(range, QuantRange::Iterable(_)));
            }
            other => panic!("expected quantifier, got {other:?}"),
        }
    }

    #[test]
    fn parses_elementary_cast() {
        let e = expr("uint256(x)");
        assert!(matches!(
            &e.kind,
            ExprKind::Cast {
                ty: SpecType::Int {
                    signed: false,
                    bits: 256
                },
                ..
            }
        ));
    }

    #[test]
    fn forty_digit_hex_is_an_address_literal() {
        let e = expr("0x00000000000000000000000000000000000000aa");
        assert!(matches!(&e.kind, ExprKind::AddressLit(_)));
        let e = expr("0xff");
        assert!(matches!(&e.kind, ExprKind::NumberLit(255)));
    }

    #[test]
    fn spans_cover_source_slices() {
        let src = "old(x) + 1";
        let e = expr(src);
        assert_eq!(e.span, Span::new(0, src.len()));
        match &e.kind {
            ExprKind::Binary { lhs, .. } => {
                assert_eq!(&src[lhs.span.start..lhs.span.end], "old(x)");
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_expression("1 +", "t").is_err());
        assert!(parse_expression("forall (uint x) y", "t").is_err());
    }

    // ---------------------------------------------------------------
    // Annotations
    // ---------------------------------------------------------------

    #[test]
    fn parses_if_succeeds_with_label() {
        let a = parse_annotation("#if_succeeds {:msg \"increments\"} old(x) + 1 == x;", "t")
            .expect("parse failed");
        assert_eq!(a.kind, AnnotationKind::IfSucceeds);
        assert_eq!(a.label.as_deref(), Some("increments"));
        assert!(matches!(a.body, AnnotationBody::Predicate(_)));
    }

    #[test]
    fn parses_invariant_without_label() {
        let a = parse_annotation("#invariant x >= 0;", "t").expect("parse failed");
        assert_eq!(a.kind, AnnotationKind::Invariant);
        assert_eq!(a.label, None);
    }

    #[test]
    fn parses_define_with_typed_params() {
        let a = parse_annotation("#define nonZero(uint256 v) bool = v > 0;", "t")
            .expect("parse failed");
        match &a.body {
            AnnotationBody::Definition(d) => {
                assert_eq!(d.name, "nonZero");
                assert_eq!(d.params.len(), 1);
                assert_eq!(d.params[0].0, "v");
                assert_eq!(d.return_type, SpecType::Bool);
            }
            other => panic!("expected definition, got {other:?}"),
        }
    }

    #[test]
    fn predicate_span_points_at_expression() {
        let src = "#invariant x >= 0;";
        let a = parse_annotation(src, "t").expect("parse failed");
        assert_eq!(&src[a.predicate_span.start..a.predicate_span.end], "x >= 0");
    }

    #[test]
    fn missing_semicolon_is_a_syntax_error() {
        assert!(parse_annotation("#invariant x >= 0", "t").is_err());
    }

    #[test]
    fn empty_label_yields_warning_diagnostic() {
        let (_, diags) =
            parse_annotation_with_diagnostics("#invariant {:msg \"\"} x >= 0;", "t")
                .expect("parse failed");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "empty_label_message");
    }

    // ---------------------------------------------------------------
    // Type strings
    // ---------------------------------------------------------------

    #[test]
    fn parses_elementary_types() {
        assert_eq!(ty("uint256"), SpecType::UINT256);
        assert_eq!(ty("uint"), SpecType::UINT256);
        assert_eq!(
            ty("int8"),
            SpecType::Int {
                signed: true,
                bits: 8
            }
        );
        assert_eq!(ty("bytes32"), SpecType::Bytes { size: Some(32) });
        assert_eq!(ty("bytes"), SpecType::Bytes { size: None });
        assert_eq!(ty("address payable"), SpecType::Address);
    }

    #[test]
    fn parses_compound_types() {
        assert_eq!(
            ty("mapping(address => uint256)"),
            SpecType::Mapping {
                key: Box::new(SpecType::Address),
                value: Box::new(SpecType::UINT256),
            }
        );
        assert_eq!(
            ty("uint8[4]"),
            SpecType::FixedArray {
                elem: Box::new(SpecType::Int {
                    signed: false,
                    bits: 8
                }),
                size: 4
            }
        );
        assert_eq!(
            ty("uint256[] memory"),
            SpecType::DynArray {
                elem: Box::new(SpecType::UINT256)
            }
        );
    }

    #[test]
    fn array_suffixes_apply_outward() {
        // T[2][] is a dynamic array of fixed arrays.
        assert_eq!(
            ty("uint256[2][]"),
            SpecType::DynArray {
                elem: Box::new(SpecType::FixedArray {
                    elem: Box::new(SpecType::UINT256),
                    size: 2
                })
            }
        );
    }

    #[test]
    fn parses_named_and_meta_types() {
        assert_eq!(
            ty("contract Token"),
            SpecType::Contract {
                name: "Token".into()
            }
        );
        assert_eq!(
            ty("struct Vault.Position storage ref"),
            SpecType::Struct {
                name: "Vault.Position".into()
            }
        );
        assert_eq!(
            ty("type(uint256)"),
            SpecType::TypeOf(Box::new(SpecType::UINT256))
        );
    }

    #[test]
    fn parses_function_type() {
        assert_eq!(
            ty("function (uint256) view returns (bool)"),
            SpecType::Function {
                params: vec![SpecType::UINT256],
                returns: vec![SpecType::Bool],
            }
        );
    }

    #[test]
    fn rejects_bad_widths() {
        assert!(parse_type_string("uint7", "t").is_err());
        assert!(parse_type_string("uint264", "t").is_err());
        assert!(parse_type_string("bytes33", "t").is_err());
    }
}
