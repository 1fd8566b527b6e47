//! End-to-end tests driving the `scribble` binary: flag validation, version
//! selection, JSON-input instrumentation, and the arm/disarm round trip.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;

fn scribble() -> Command {
    Command::cargo_bin("scribble").expect("binary builds")
}

const ANNOTATED_SOURCE: &str = "\
/// #invariant x >= 0;
contract Foo {
    uint256 x;

    function inc() public {
    }
}
";

/// Write an annotated source file plus a host-compiler standard-JSON document
/// describing its AST, with source ranges derived from the real offsets.
fn write_fixture(dir: &Path) -> (PathBuf, PathBuf) {
    let sol_path = dir.join("foo.sol");
    fs::write(&sol_path, ANNOTATED_SOURCE).unwrap();
    let sol = sol_path.to_string_lossy().into_owned();

    let c_off = ANNOTATED_SOURCE.find("contract Foo").unwrap();
    let c_len = ANNOTATED_SOURCE.len() - c_off - 1;
    let var_off = ANNOTATED_SOURCE.find("uint256 x").unwrap();
    let fn_off = ANNOTATED_SOURCE.find("function inc").unwrap();
    let body_off = ANNOTATED_SOURCE[fn_off..].find('{').unwrap() + fn_off;

    let document = json!({
        "sources": {
            &sol: {
                "ast": {
                    "nodeType": "SourceUnit",
                    "id": 100,
                    "src": format!("0:{}:0", ANNOTATED_SOURCE.len()),
                    "absolutePath": &sol,
                    "nodes": [
                        {
                            "nodeType": "ContractDefinition",
                            "id": 50,
                            "src": format!("{c_off}:{c_len}:0"),
                            "name": "Foo",
                            "contractKind": "contract",
                            "linearizedBaseContracts": [50],
                            "nodes": [
                                {
                                    "nodeType": "VariableDeclaration",
                                    "id": 10,
                                    "src": format!("{var_off}:9:0"),
                                    "name": "x",
                                    "stateVariable": true,
                                    "visibility": "internal",
                                    "typeDescriptions": {"typeString": "uint256"},
                                    "typeName": {
                                        "nodeType": "ElementaryTypeName",
                                        "id": 9,
                                        "src": format!("{var_off}:7:0"),
                                        "name": "uint256"
                                    }
                                },
                                {
                                    "nodeType": "FunctionDefinition",
                                    "id": 30,
                                    "src": format!("{fn_off}:30:0"),
                                    "name": "inc",
                                    "kind": "function",
                                    "visibility": "public",
                                    "stateMutability": "nonpayable",
                                    "parameters": {"nodeType": "ParameterList", "parameters": []},
                                    "returnParameters": {"nodeType": "ParameterList", "parameters": []},
                                    "body": {
                                        "nodeType": "Block",
                                        "id": 29,
                                        "src": format!("{body_off}:7:0"),
                                        "statements": []
                                    }
                                }
                            ]
                        }
                    ]
                }
            }
        }
    });
    let json_path = dir.join("foo.ast.json");
    fs::write(&json_path, serde_json::to_string_pretty(&document).unwrap()).unwrap();
    (json_path, sol_path)
}

#[test]
fn rejects_unknown_output_mode() {
    scribble()
        .args(["foo.sol", "--output-mode", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown output mode"));
}

#[test]
fn json_input_requires_explicit_version() {
    let dir = tempfile::tempdir().unwrap();
    let (json_path, _) = write_fixture(dir.path());
    scribble()
        .arg(&json_path)
        .args(["--input-mode", "json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mandatory when input is JSON"));
}

#[test]
fn conflicting_pragmas_are_an_ambiguous_version_error() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.sol");
    let b = dir.path().join("b.sol");
    fs::write(&a, "pragma solidity ^0.7.0;\ncontract A {}\n").unwrap();
    fs::write(&b, "pragma solidity ^0.8.0;\ncontract B {}\n").unwrap();
    scribble()
        .arg(&a)
        .arg(&b)
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("Ambiguous compiler versions")
                .and(predicate::str::contains("a.sol"))
                .and(predicate::str::contains("b.sol")),
        );
}

#[test]
fn json_input_instruments_to_per_file_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let (json_path, sol_path) = write_fixture(dir.path());
    let utils_dir = dir.path().join("utils");
    fs::create_dir(&utils_dir).unwrap();

    scribble()
        .arg(&json_path)
        .args(["--input-mode", "json", "--compiler-version", "0.8.17"])
        .args(["--output-mode", "files"])
        .arg("--utils-output-path")
        .arg(&utils_dir)
        .arg("--quiet")
        .assert()
        .success();

    let instrumented =
        fs::read_to_string(format!("{}.instrumented", sol_path.display())).unwrap();
    assert!(instrumented.contains("function inc() public {"));
    assert!(instrumented.contains("inc_original();"));
    assert!(instrumented.contains("__scribble_check_state_invariants_Foo();"));
    assert!(instrumented.contains("contract Foo is __scribble_ReentrancyUtils {"));

    let utils = fs::read_to_string(utils_dir.join("__scribble_ReentrancyUtils.sol")).unwrap();
    assert!(utils.contains("contract __scribble_ReentrancyUtils {"));
    assert!(utils.contains("bool __scribble_out_of_contract = true;"));

    // The original file is untouched without --arm.
    assert_eq!(fs::read_to_string(&sol_path).unwrap(), ANNOTATED_SOURCE);
}

#[test]
fn flat_output_concatenates_with_single_pragma() {
    let dir = tempfile::tempdir().unwrap();
    let (json_path, _) = write_fixture(dir.path());
    let out = dir.path().join("flat.sol");

    scribble()
        .arg(&json_path)
        .args(["--input-mode", "json", "--compiler-version", "0.8.17"])
        .args(["--output-mode", "flat"])
        .arg("--output")
        .arg(&out)
        .arg("--quiet")
        .assert()
        .success();

    let flat = fs::read_to_string(&out).unwrap();
    assert!(flat.starts_with("pragma solidity 0.8.17;\n"));
    assert_eq!(flat.matches("pragma solidity").count(), 1);
    assert!(flat.contains("contract Foo is __scribble_ReentrancyUtils {"));
    assert!(flat.contains("contract __scribble_ReentrancyUtils {"));
    assert!(!flat.contains("import"));
}

#[test]
fn metadata_file_records_each_annotation_once() {
    let dir = tempfile::tempdir().unwrap();
    let (json_path, _) = write_fixture(dir.path());
    let meta_path = dir.path().join("meta.json");

    scribble()
        .arg(&json_path)
        .args(["--input-mode", "json", "--compiler-version", "0.8.17"])
        .args(["--output-mode", "files"])
        .arg("--utils-output-path")
        .arg(dir.path())
        .arg("--instrumentation-metadata-file")
        .arg(&meta_path)
        .arg("--quiet")
        .assert()
        .success();

    let meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&meta_path).unwrap()).unwrap();
    let properties = meta["propertyMap"].as_array().unwrap();
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0]["target"], "contract");
    assert_eq!(properties[0]["targetName"], "Foo");
    assert!(meta["instrToOriginalMap"].as_array().unwrap().len() > 0);
}

/// S6: `--arm` swaps instrumented code into place; `--disarm` restores the
/// original bytes exactly.
#[test]
fn arm_then_disarm_round_trips_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let (json_path, sol_path) = write_fixture(dir.path());
    let original_bytes = fs::read(&sol_path).unwrap();

    scribble()
        .arg(&json_path)
        .args(["--input-mode", "json", "--compiler-version", "0.8.17"])
        .args(["--output-mode", "files"])
        .arg("--utils-output-path")
        .arg(dir.path())
        .arg("--arm")
        .arg("--quiet")
        .assert()
        .success();

    let armed = fs::read(&sol_path).unwrap();
    assert_ne!(armed, original_bytes);
    let preserved = fs::read(format!("{}.original", sol_path.display())).unwrap();
    assert_eq!(preserved, original_bytes);

    scribble()
        .arg(&sol_path)
        .arg("--disarm")
        .assert()
        .success();
    assert_eq!(fs::read(&sol_path).unwrap(), original_bytes);
    assert!(!Path::new(&format!("{}.original", sol_path.display())).exists());
}

#[test]
fn filter_type_drops_non_matching_annotations() {
    let dir = tempfile::tempdir().unwrap();
    let (json_path, sol_path) = write_fixture(dir.path());

    scribble()
        .arg(&json_path)
        .args(["--input-mode", "json", "--compiler-version", "0.8.17"])
        .args(["--output-mode", "files"])
        .arg("--utils-output-path")
        .arg(dir.path())
        .args(["--filter-type", "^if_succeeds$"])
        .arg("--quiet")
        .assert()
        .success();

    // The lone invariant was filtered out, so nothing is instrumented.
    let instrumented =
        fs::read_to_string(format!("{}.instrumented", sol_path.display())).unwrap();
    assert!(!instrumented.contains("inc_original"));
    assert!(!instrumented.contains("is __scribble_ReentrancyUtils"));
}
