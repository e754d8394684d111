//! CLI integration tests for schema-forms binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("schema-forms"))
}

// Helper to create a temp input file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

const SCHEMA: &str = r#"{
    "type": "object",
    "required": ["NAME"],
    "properties": {
        "NAME": { "type": "string" },
        "UNIT": {
            "type": "object",
            "properties": {
                "FORCE": { "type": "string" },
                "LENGTH": { "type": "string" }
            }
        },
        "METHOD": {
            "oneOf": [
                { "title": "Alpha", "properties": { "ALPHA": { "type": "number" } } },
                { "title": "Beta", "properties": { "BETA": { "type": "number" } } }
            ]
        }
    }
}"#;

const RULES: &str = r#"{
    "wrapperRules": [
        { "pattern": "^/analysis/", "wrapperKey": "Assign" }
    ]
}"#;

mod compile_command {
    use super::*;

    #[test]
    fn basic_compile() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);

        cmd()
            .args(["compile", schema.to_str().unwrap(), "--mode", "static"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""mode":"STATIC""#))
            .stdout(predicate::str::contains(r#""name":"General""#))
            .stdout(predicate::str::contains(r#""kind":"oneOf""#));
    }

    #[test]
    fn compile_with_pretty() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);

        cmd()
            .args(["compile", schema.to_str().unwrap(), "--pretty"])
            .assert()
            .success()
            // Pretty output has newlines and indentation
            .stdout(predicate::str::contains("{\n"));
    }

    #[test]
    fn missing_schema_exit_code() {
        cmd()
            .args(["compile", "/nonexistent/schema.json"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn invalid_json_exit_code() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", "{ not json");

        cmd()
            .args(["compile", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid JSON"));
    }

    #[test]
    fn non_object_schema_rejected() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", "[1, 2]");

        cmd()
            .args(["compile", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("must be an object"));
    }

    #[test]
    fn bad_wrapper_pattern_rejected() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let rules = write_temp_file(
            &dir,
            "rules.json",
            r#"{"wrapperRules":[{"pattern":"([","wrapperKey":"Assign"}]}"#,
        );

        cmd()
            .args([
                "compile",
                schema.to_str().unwrap(),
                "--rules",
                rules.to_str().unwrap(),
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid wrapper pattern"));
    }
}

mod fields_command {
    use super::*;

    #[test]
    fn fields_interleave_sections() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);

        cmd()
            .args(["fields", schema.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"entry":"section","name":"General"}"#))
            .stdout(predicate::str::contains(r#""path":"UNIT.FORCE""#))
            .stdout(predicate::str::contains(r#""oneOfOptions":["Alpha","Beta"]"#));
    }
}

mod assemble_command {
    use super::*;

    #[test]
    fn disabled_object_omitted() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let state = write_temp_file(
            &dir,
            "state.json",
            r#"{"NAME":"beam","UNIT._enabled":false,"UNIT.FORCE":"KN"}"#,
        );

        cmd()
            .args([
                "assemble",
                schema.to_str().unwrap(),
                "--state",
                state.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::diff("{\"NAME\":\"beam\"}\n"));
    }

    #[test]
    fn selected_branch_and_enabled_object() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let state = write_temp_file(
            &dir,
            "state.json",
            r#"{"UNIT._enabled":true,"UNIT.FORCE":"KN","METHOD.__selectedOption":1,"ALPHA":2,"BETA":5}"#,
        );

        cmd()
            .args([
                "assemble",
                schema.to_str().unwrap(),
                "--state",
                state.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""UNIT":{"FORCE":"KN"}"#))
            .stdout(predicate::str::contains(r#""BETA":5"#))
            .stdout(predicate::str::contains("ALPHA").not())
            .stdout(predicate::str::contains("__selectedOption").not());
    }

    #[test]
    fn instances_wrapped_by_endpoint() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"type":"object","properties":{"X":{"type":"integer"}}}"#,
        );
        let rules = write_temp_file(&dir, "rules.json", RULES);
        let state = write_temp_file(&dir, "state.json", r#"{"1":{"X":1},"2":{"X":2}}"#);

        cmd()
            .args([
                "assemble",
                schema.to_str().unwrap(),
                "--state",
                state.to_str().unwrap(),
                "--rules",
                rules.to_str().unwrap(),
                "--endpoint",
                "/analysis/static",
                "--instances",
            ])
            .assert()
            .success()
            .stdout(predicate::str::diff(
                "{\"Assign\":{\"1\":{\"X\":1},\"2\":{\"X\":2}}}\n",
            ));
    }

    #[test]
    fn unmatched_endpoint_left_bare() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let rules = write_temp_file(&dir, "rules.json", RULES);
        let state = write_temp_file(&dir, "state.json", r#"{"NAME":"n"}"#);

        cmd()
            .args([
                "assemble",
                schema.to_str().unwrap(),
                "--state",
                state.to_str().unwrap(),
                "--rules",
                rules.to_str().unwrap(),
                "--endpoint",
                "/db/node",
            ])
            .assert()
            .success()
            .stdout(predicate::str::diff("{\"NAME\":\"n\"}\n"));
    }

    #[test]
    fn check_rejects_invalid_state() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let state = write_temp_file(
            &dir,
            "state.json",
            r#"{"METHOD.__selectedOption":1,"BETA":"fast"}"#,
        );

        cmd()
            .args([
                "assemble",
                schema.to_str().unwrap(),
                "--state",
                state.to_str().unwrap(),
                "--check",
            ])
            .assert()
            .code(1)
            .stdout(predicate::str::is_empty())
            .stderr(predicate::str::contains("Validation failed"))
            .stderr(predicate::str::contains("NAME: NAME is required"))
            .stderr(predicate::str::contains("BETA: BETA must be a number"));
    }

    #[test]
    fn check_passes_valid_state() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let state = write_temp_file(&dir, "state.json", r#"{"NAME":"n"}"#);

        cmd()
            .args([
                "assemble",
                schema.to_str().unwrap(),
                "--state",
                state.to_str().unwrap(),
                "--check",
            ])
            .assert()
            .success()
            .stdout(predicate::str::diff("{\"NAME\":\"n\"}\n"));
    }

    #[test]
    fn assemble_with_output_file() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let state = write_temp_file(&dir, "state.json", r#"{"NAME":"n"}"#);
        let output = dir.path().join("payload.json");

        cmd()
            .args([
                "assemble",
                schema.to_str().unwrap(),
                "--state",
                state.to_str().unwrap(),
                "--output",
                output.to_str().unwrap(),
            ])
            .assert()
            .success();

        let content = fs::read_to_string(&output).unwrap();
        assert_eq!(content, r#"{"NAME":"n"}"#);
    }

    #[test]
    fn empty_instance_state_rejected() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let state = write_temp_file(&dir, "state.json", "{}");

        cmd()
            .args([
                "assemble",
                schema.to_str().unwrap(),
                "--state",
                state.to_str().unwrap(),
                "--instances",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("no instances"));
    }
}

mod import_command {
    use super::*;

    #[test]
    fn import_infers_branch_and_enables_objects() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let payload = write_temp_file(
            &dir,
            "payload.json",
            r#"{"UNIT":{"FORCE":"KN"},"BETA":5,"EXTRA":1}"#,
        );

        cmd()
            .args([
                "import",
                schema.to_str().unwrap(),
                "--payload",
                payload.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""UNIT._enabled":true"#))
            .stdout(predicate::str::contains(r#""METHOD.__selectedOption":1"#))
            .stdout(predicate::str::contains(r#""BETA":5"#))
            .stdout(predicate::str::contains(r#""EXTRA":1"#));
    }

    #[test]
    fn import_instances_through_wrapper() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let rules = write_temp_file(&dir, "rules.json", RULES);
        let payload = write_temp_file(
            &dir,
            "payload.json",
            r#"{"Assign":{"1":{"NAME":"a"},"2":{"NAME":"b"}}}"#,
        );

        cmd()
            .args([
                "import",
                schema.to_str().unwrap(),
                "--payload",
                payload.to_str().unwrap(),
                "--rules",
                rules.to_str().unwrap(),
                "--instances",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""1":{"NAME":"a""#))
            .stdout(predicate::str::contains(r#""2":{"NAME":"b""#));
    }

    #[test]
    fn malformed_payload_exit_code() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let payload = write_temp_file(&dir, "payload.json", "{ broken");

        cmd()
            .args([
                "import",
                schema.to_str().unwrap(),
                "--payload",
                payload.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("invalid JSON"));
    }

    #[test]
    fn non_numeric_instance_key_rejected() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", SCHEMA);
        let payload = write_temp_file(&dir, "payload.json", r#"{"first":{"NAME":"a"}}"#);

        cmd()
            .args([
                "import",
                schema.to_str().unwrap(),
                "--payload",
                payload.to_str().unwrap(),
                "--instances",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("not a positive integer"));
    }
}

mod resolve_command {
    use super::*;

    #[test]
    fn enhanced_wins_over_original() {
        let dir = TempDir::new().unwrap();
        let enhanced = write_temp_file(&dir, "enhanced.json", SCHEMA);
        let original = write_temp_file(&dir, "original.json", SCHEMA);

        cmd()
            .args([
                "resolve",
                "--enhanced",
                enhanced.to_str().unwrap(),
                "--original",
                original.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::diff(
                "{\"source\":\"enhanced\",\"isEnhanced\":true}\n",
            ));
    }

    #[test]
    fn saved_enhanced_only_with_markers() {
        let dir = TempDir::new().unwrap();
        let saved = write_temp_file(&dir, "saved.json", SCHEMA);

        cmd()
            .args(["resolve", "--saved", saved.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""source":"saved""#))
            .stdout(predicate::str::contains(r#""isEnhanced":false"#));

        let marked = write_temp_file(
            &dir,
            "marked.json",
            r#"{"type":"object","properties":{"A":{"type":"string","x-ui":{"group":"Main"}}}}"#,
        );
        cmd()
            .args(["resolve", "--saved", marked.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""isEnhanced":true"#));
    }

    #[test]
    fn no_sources_is_an_error() {
        cmd()
            .args(["resolve"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("no schema available"));
    }
}
