// Command line behaviour of the forest-exec binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn forest_exec() -> Command {
    Command::cargo_bin("forest-exec").unwrap()
}

#[test]
fn test_help_lists_subcommands() {
    forest_exec()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("area"))
        .stdout(predicate::str::contains("project"))
        .stdout(predicate::str::contains("simulate"));
}

#[test]
fn test_project_false_origin() {
    forest_exec()
        .args(["project", "200000", "300000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-8.1319061"))
        .stdout(predicate::str::contains("39.6682583"));
}

#[test]
fn test_area_of_hectare_square() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("square.geojson");
    fs::write(
        &path,
        r#"{"type": "Polygon", "coordinates": [[[200000, 300000], [200100, 300000], [200100, 300100], [200000, 300100], [200000, 300000]]]}"#,
    )
    .unwrap();

    let output = forest_exec().arg("area").arg(&path).output().unwrap();
    assert!(output.status.success());
    let area: f64 = String::from_utf8(output.stdout).unwrap().trim().parse().unwrap();
    assert!((area - 1.0).abs() < 1e-3, "area was {area}");
}

#[test]
fn test_area_rejects_malformed_geometry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.geojson");
    fs::write(&path, r#"{"type": "Polygon", "coordinates": []}"#).unwrap();

    forest_exec().arg("area").arg(&path).assert().failure();
}

#[test]
fn test_simulate_prints_report() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scenario.json");
    fs::write(
        &path,
        r#"{
            "worksheets": [{"id": 1, "operations": [{"code": "OP1", "area_ha": 0.5}], "polygon_ids": [10]}],
            "polygons": {"10": {"type": "Polygon", "coordinates": [[[200000, 300000], [200100, 300000], [200100, 300100], [200000, 300100], [200000, 300000]]]}},
            "users": [
                {"username": "rep", "role": "PRBO", "organization": "acme"},
                {"username": "op1", "role": "PO", "organization": "acme"}
            ],
            "steps": [
                {"as": "rep", "op": "create", "worksheet": 1},
                {"as": "rep", "op": "assign", "parcel": "execution_1_OP1_10", "operator": "op1"},
                {"as": "op1", "op": "start", "parcel": "execution_1_OP1_10", "label": "s1"},
                {"as": "op1", "op": "stop", "activity": "@s1", "finished": true}
            ],
            "export": [1]
        }"#,
    )
    .unwrap();

    forest_exec()
        .arg("simulate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"sheet_completed\""))
        .stdout(predicate::str::contains("EXECUTADO"));
}

#[test]
fn test_simulate_missing_file_fails() {
    forest_exec()
        .args(["simulate", "/nonexistent/scenario.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load scenario"));
}
