mod test_support;

use serde_json::json;
use test_support::{temp_dir, Sidecar, HOD};

#[test]
fn health_and_envelope_shapes() {
    let mut sc = Sidecar::spawn();

    let health = sc.ok(None, "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health["workspacePath"].is_null());
    assert!(health["workspace"].is_null());

    let before = sc.fails(Some(HOD), "users.create", json!({}), "no_workspace");
    assert_eq!(before["status"], json!(503));

    let bad = sc.send_raw("{not json");
    assert_eq!(bad["success"], json!(false));
    assert_eq!(bad["code"], json!("bad_json"));
    assert_eq!(bad["status"], json!(400));

    let unknown = sc.fails(None, "grades.compute", json!({}), "not_implemented");
    assert_eq!(unknown["status"], json!(404));
    assert!(unknown["error"].as_str().expect("message").contains("grades.compute"));
}

#[test]
fn caller_identity_is_enforced_before_any_lookup() {
    let workspace = temp_dir("classtrack-router-auth");
    let mut sc = Sidecar::spawn();
    let selected = sc.ok(
        None,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["workspacePath"], json!(workspace.to_string_lossy()));

    let health = sc.ok(None, "health", json!({}));
    assert_eq!(health["workspace"]["classes"], json!(0));
    assert_eq!(
        health["workspace"]["submissionTypes"],
        json!({ "ta": true, "cie": true, "defaulter": true })
    );

    let anon = sc.fails(None, "classData.get", json!({}), "unauthenticated");
    assert_eq!(anon["status"], json!(401));

    let student = sc.fails(
        Some(("s-1", "student")),
        "students.list",
        json!({}),
        "forbidden",
    );
    assert_eq!(student["status"], json!(403));

    sc.fails(
        Some(("f-1", "faculty")),
        "classData.get",
        json!({}),
        "forbidden",
    );

    // A class teacher without a class gets a 404, not an empty roster.
    sc.fails(
        Some(("ct-1", "class_teacher")),
        "class.info",
        json!({}),
        "not_found",
    );

    let types = sc.ok(Some(("s-1", "student")), "submissionTypes.list", json!({}));
    let kinds: Vec<&str> = types["submissionTypes"]
        .as_array()
        .expect("types")
        .iter()
        .filter_map(|t| t["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["ta", "cie", "defaulter"]);
}

#[test]
fn admin_methods_validate_roles_and_references() {
    let workspace = temp_dir("classtrack-router-admin");
    let mut sc = Sidecar::spawn();
    sc.ok(
        None,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    sc.fails(
        Some(("ct-1", "class_teacher")),
        "users.create",
        json!({ "name": "X", "email": "x@example.edu", "role": "faculty", "password": "pw" }),
        "forbidden",
    );
    let fac = sc.ok(
        Some(HOD),
        "users.create",
        json!({ "name": "Arun", "email": "Arun@Example.edu", "role": "faculty", "password": "pw" }),
    );
    assert_eq!(fac["user"]["email"], json!("arun@example.edu"));
    let dup = sc.fails(
        Some(HOD),
        "users.create",
        json!({ "name": "Arun 2", "email": "arun@example.edu", "role": "faculty", "password": "pw" }),
        "conflict",
    );
    assert_eq!(dup["status"], json!(409));

    sc.ok(
        Some(HOD),
        "users.create",
        json!({ "name": "Dina", "email": "dina@example.edu", "role": "director", "password": "pw" }),
    );
    let listed = sc.ok(Some(("ct-1", "class_teacher")), "faculties.list", json!({}));
    let names: Vec<&str> = listed["faculties"]
        .as_array()
        .expect("faculties")
        .iter()
        .map(|f| f["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["Arun"]);

    let faculty_id = fac["user"]["id"].as_str().expect("id").to_string();
    sc.fails(
        Some(("dir-1", "director")),
        "classes.create",
        json!({ "name": "CSE 2B", "classTeacherId": faculty_id }),
        "bad_params",
    );
}
