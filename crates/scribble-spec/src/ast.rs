/// Source span for error reporting, relative to the text handed to the parser
/// until lifted to file coordinates by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Shift the span by `delta` bytes (parser-local → file coordinates).
    pub fn offset(self, delta: usize) -> Self {
        Self {
            start: self.start + delta,
            end: self.end + delta,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Quantifier flavor in `forall`/`exists` expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    ForAll,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Mod
                | BinaryOp::Pow
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        write!(f, "{s}")
    }
}

/// A specification-language expression with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Shift every span in the tree by `delta` bytes. Used by the extractor to
    /// lift parser-local spans into file coordinates.
    pub fn offset_spans(&mut self, delta: usize) {
        self.map_spans(&|s| s.offset(delta));
    }

    /// Rewrite every span in the tree through `f`. The extractor uses this to
    /// lift parser-local spans through a comment-decoration offset table,
    /// which is not a constant shift for multi-line annotations.
    pub fn map_spans(&mut self, f: &impl Fn(Span) -> Span) {
        self.span = f(self.span);
        match &mut self.kind {
            ExprKind::NumberLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::AddressLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::Ident(_) => {}
            ExprKind::Index { base, index } => {
                base.map_spans(f);
                index.map_spans(f);
            }
            ExprKind::Member { base, .. } => base.map_spans(f),
            ExprKind::Call { callee, args } => {
                callee.map_spans(f);
                for a in args {
                    a.map_spans(f);
                }
            }
            ExprKind::Unary { operand, .. } => operand.map_spans(f),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.map_spans(f);
                rhs.map_spans(f);
            }
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.map_spans(f);
                then_branch.map_spans(f);
                else_branch.map_spans(f);
            }
            ExprKind::Old(inner) => inner.map_spans(f),
            ExprKind::Let { bound, body, .. } => {
                bound.map_spans(f);
                body.map_spans(f);
            }
            ExprKind::Quantified { range, body, .. } => {
                match range {
                    QuantRange::IntRange { low, high } => {
                        low.map_spans(f);
                        high.map_spans(f);
                    }
                    QuantRange::Iterable(e) => e.map_spans(f),
                }
                body.map_spans(f);
            }
            ExprKind::Tuple(items) => {
                for i in items {
                    i.map_spans(f);
                }
            }
            ExprKind::Cast { expr, .. } => expr.map_spans(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    NumberLit(i128),
    BoolLit(bool),
    /// Hex literal of address width, kept verbatim.
    AddressLit(String),
    StringLit(String),
    Ident(String),
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        member: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Old(Box<Expr>),
    Let {
        name: String,
        bound: Box<Expr>,
        body: Box<Expr>,
    },
    Quantified {
        quantifier: Quantifier,
        var_type: SpecType,
        var: String,
        range: QuantRange,
        body: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    Cast {
        ty: SpecType,
        expr: Box<Expr>,
    },
}

/// The range a quantified variable iterates over. Only finite ranges are
/// accepted by the checker.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantRange {
    /// `low...high`, inclusive on both ends.
    IntRange { low: Box<Expr>, high: Box<Expr> },
    /// An array (index set) or explicit key iterable.
    Iterable(Box<Expr>),
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExprKind::NumberLit(n) => write!(f, "{n}"),
            ExprKind::BoolLit(b) => write!(f, "{b}"),
            ExprKind::AddressLit(a) => write!(f, "{a}"),
            ExprKind::StringLit(s) => write!(f, "{s:?}"),
            ExprKind::Ident(name) => write!(f, "{name}"),
            ExprKind::Index { base, index } => write!(f, "{base}[{index}]"),
            ExprKind::Member { base, member } => write!(f, "{base}.{member}"),
            ExprKind::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            ExprKind::Unary { op, operand } => {
                let s = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                };
                write!(f, "{s}{operand}")
            }
            ExprKind::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => write!(f, "({cond} ? {then_branch} : {else_branch})"),
            ExprKind::Old(inner) => write!(f, "old({inner})"),
            ExprKind::Let { name, bound, body } => {
                write!(f, "(let {name} := {bound} in {body})")
            }
            ExprKind::Quantified {
                quantifier,
                var_type,
                var,
                range,
                body,
            } => {
                let q = match quantifier {
                    Quantifier::ForAll => "forall",
                    Quantifier::Exists => "exists",
                };
                match range {
                    QuantRange::IntRange { low, high } => {
                        write!(f, "({q} ({var_type} {var} in {low}...{high}) {body})")
                    }
                    QuantRange::Iterable(e) => {
                        write!(f, "({q} ({var_type} {var} in {e}) {body})")
                    }
                }
            }
            ExprKind::Tuple(items) => {
                write!(f, "(")?;
                for (i, e) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
            ExprKind::Cast { ty, expr } => write!(f, "{ty}({expr})"),
        }
    }
}

/// Specification-language type. Equality is structural (`PartialEq` derive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecType {
    Int {
        signed: bool,
        bits: u16,
    },
    Address,
    Bool,
    String,
    /// `bytes` when `size` is `None`, `bytesN` otherwise.
    Bytes {
        size: Option<u8>,
    },
    FixedArray {
        elem: Box<SpecType>,
        size: u64,
    },
    DynArray {
        elem: Box<SpecType>,
    },
    Mapping {
        key: Box<SpecType>,
        value: Box<SpecType>,
    },
    Tuple(Vec<SpecType>),
    Contract {
        name: String,
    },
    Struct {
        name: String,
    },
    Enum {
        name: String,
    },
    Function {
        params: Vec<SpecType>,
        returns: Vec<SpecType>,
    },
    /// The meta-type of a type, for type-of-type positions (`type(uint256)`).
    TypeOf(Box<SpecType>),
}

impl SpecType {
    pub const UINT256: SpecType = SpecType::Int {
        signed: false,
        bits: 256,
    };

    pub fn is_numeric(&self) -> bool {
        matches!(self, SpecType::Int { .. })
    }

    /// Reference types compare by identity of the named definition, numeric
    /// types by sign and width.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            SpecType::String
                | SpecType::Bytes { size: None }
                | SpecType::FixedArray { .. }
                | SpecType::DynArray { .. }
                | SpecType::Mapping { .. }
                | SpecType::Struct { .. }
        )
    }
}

impl std::fmt::Display for SpecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecType::Int { signed, bits } => {
                write!(f, "{}int{bits}", if *signed { "" } else { "u" })
            }
            SpecType::Address => write!(f, "address"),
            SpecType::Bool => write!(f, "bool"),
            SpecType::String => write!(f, "string"),
            SpecType::Bytes { size: Some(n) } => write!(f, "bytes{n}"),
            SpecType::Bytes { size: None } => write!(f, "bytes"),
            SpecType::FixedArray { elem, size } => write!(f, "{elem}[{size}]"),
            SpecType::DynArray { elem } => write!(f, "{elem}[]"),
            SpecType::Mapping { key, value } => write!(f, "mapping({key} => {value})"),
            SpecType::Tuple(items) => {
                write!(f, "tuple(")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            SpecType::Contract { name } => write!(f, "contract {name}"),
            SpecType::Struct { name } => write!(f, "struct {name}"),
            SpecType::Enum { name } => write!(f, "enum {name}"),
            SpecType::Function { params, returns } => {
                write!(f, "function (")?;
                for (i, t) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")?;
                if !returns.is_empty() {
                    write!(f, " returns (")?;
                    for (i, t) in returns.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{t}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            SpecType::TypeOf(inner) => write!(f, "type({inner})"),
        }
    }
}

/// The three annotation kinds the extractor recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    IfSucceeds,
    Invariant,
    Define,
}

impl AnnotationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationKind::IfSucceeds => "if_succeeds",
            AnnotationKind::Invariant => "invariant",
            AnnotationKind::Define => "define",
        }
    }

    /// `define` declares a helper, not a runtime-enforced property.
    pub fn is_property(self) -> bool {
        matches!(self, AnnotationKind::IfSucceeds | AnnotationKind::Invariant)
    }
}

impl std::fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed annotation. Spans are parser-local until the extractor lifts them.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub kind: AnnotationKind,
    /// `{:msg "…"}` label contents, if present.
    pub label: Option<String>,
    pub body: AnnotationBody,
    pub span: Span,
    /// Span of the predicate (or definition body) within the annotation text.
    pub predicate_span: Span,
}

impl Annotation {
    pub fn offset_spans(&mut self, delta: usize) {
        self.map_spans(&|s| s.offset(delta));
    }

    pub fn map_spans(&mut self, f: &impl Fn(Span) -> Span) {
        self.span = f(self.span);
        self.predicate_span = f(self.predicate_span);
        match &mut self.body {
            AnnotationBody::Predicate(e) => e.map_spans(f),
            AnnotationBody::Definition(d) => {
                d.span = f(d.span);
                d.body.map_spans(f);
            }
        }
    }

    /// The predicate expression for property annotations, the definition body
    /// for `define`.
    pub fn expression(&self) -> &Expr {
        match &self.body {
            AnnotationBody::Predicate(e) => e,
            AnnotationBody::Definition(d) => &d.body,
        }
    }

    pub fn expression_mut(&mut self) -> &mut Expr {
        match &mut self.body {
            AnnotationBody::Predicate(e) => e,
            AnnotationBody::Definition(d) => &mut d.body,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationBody {
    Predicate(Expr),
    Definition(UserFunctionDef),
}

/// A `define name(params) type = expr` helper function.
#[derive(Debug, Clone, PartialEq)]
pub struct UserFunctionDef {
    pub name: String,
    pub params: Vec<(String, SpecType)>,
    pub return_type: SpecType,
    pub body: Expr,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(a: usize, b: usize) -> Span {
        Span::new(a, b)
    }

    #[test]
    fn span_offset_shifts_both_ends() {
        assert_eq!(sp(3, 8).offset(10), sp(13, 18));
    }

    #[test]
    fn type_equality_is_structural() {
        let a = SpecType::Mapping {
            key: Box::new(SpecType::Address),
            value: Box::new(SpecType::UINT256),
        };
        let b = SpecType::Mapping {
            key: Box::new(SpecType::Address),
            value: Box::new(SpecType::Int {
                signed: false,
                bits: 256,
            }),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn type_display_roundtrips_common_forms() {
        assert_eq!(SpecType::UINT256.to_string(), "uint256");
        assert_eq!(
            SpecType::DynArray {
                elem: Box::new(SpecType::Bool)
            }
            .to_string(),
            "bool[]"
        );
        assert_eq!(
            SpecType::Mapping {
                key: Box::new(SpecType::Address),
                value: Box::new(SpecType::UINT256),
            }
            .to_string(),
            "mapping(address => uint256)"
        );
    }

    #[test]
    fn expr_display_parenthesizes_binary() {
        let e = Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr::new(ExprKind::Ident("x".into()), sp(0, 1))),
                rhs: Box::new(Expr::new(ExprKind::NumberLit(1), sp(4, 5))),
            },
            sp(0, 5),
        );
        assert_eq!(e.to_string(), "(x + 1)");
    }

    #[test]
    fn offset_spans_reaches_nested_nodes() {
        let mut e = Expr::new(
            ExprKind::Old(Box::new(Expr::new(ExprKind::Ident("x".into()), sp(4, 5)))),
            sp(0, 6),
        );
        e.offset_spans(100);
        assert_eq!(e.span, sp(100, 106));
        match &e.kind {
            ExprKind::Old(inner) => assert_eq!(inner.span, sp(104, 105)),
            _ => unreachable!(),
        }
    }
}
