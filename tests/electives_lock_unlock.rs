mod test_support;

use serde_json::json;
use test_support::Fixture;

#[test]
fn student_selection_locks_until_staff_unlock() {
    let mut fx = Fixture::new("classtrack-electives-lock");
    let f0 = fx.faculty[0].clone();
    let f1 = fx.faculty[1].clone();
    let oe_a = fx.add_subject("Economics", "OE201", "OE", json!([{ "facultyId": f0 }]));
    let oe_b = fx.add_subject("Psychology", "OE202", "OE", json!([{ "facultyId": f1 }]));
    let ids = fx.import("roll_no,name\n22CS001,Asha\n");
    let asha = ids[0].clone();
    let me = Some((asha.as_str(), "student"));

    let picked = fx.sidecar.ok(
        me,
        "electives.select",
        json!({ "selections": { "OE": { "subjectId": oe_a } } }),
    );
    assert_eq!(picked["locked"], json!(true));
    assert_eq!(picked["selections"]["OE"]["subjectId"], json!(oe_a));
    assert_eq!(picked["selections"]["OE"]["facultyId"], json!(f0));

    let again = fx.sidecar.fails(
        me,
        "electives.select",
        json!({ "selections": { "OE": { "subjectId": oe_b } } }),
        "forbidden",
    );
    assert_eq!(again["status"], json!(403));

    let view = fx.teacher_ok("electives.get", json!({ "studentId": asha }));
    assert_eq!(view["locked"], json!(true));
    assert_eq!(view["offered"]["OE"].as_array().expect("OE").len(), 2);

    let unlocked = fx.teacher_ok("electives.unlock", json!({ "studentId": asha }));
    assert_eq!(unlocked["locked"], json!(false));

    let repicked = fx.sidecar.ok(
        me,
        "electives.select",
        json!({ "selections": { "OE": { "subjectId": oe_b } } }),
    );
    assert_eq!(repicked["selections"]["OE"]["subjectCode"], json!("OE202"));
    assert_eq!(repicked["locked"], json!(true));

    // The new grader sees the student; the old one no longer does.
    let rows = fx.faculty_ok(1, "faculty.students", json!({}));
    assert_eq!(rows["students"][0]["subjectCode"], json!("OE202"));
    let old = fx.faculty_ok(0, "faculty.students", json!({}));
    assert_eq!(old["students"], json!([]));
}

#[test]
fn students_cannot_use_staff_elective_methods() {
    let mut fx = Fixture::new("classtrack-electives-roles");
    let ids = fx.import("roll_no,name\n22CS001,Asha\n");
    let me = Some((ids[0].as_str(), "student"));
    fx.sidecar.fails(
        me,
        "electives.unlock",
        json!({ "studentId": ids[0] }),
        "forbidden",
    );
    fx.sidecar.fails(
        me,
        "electives.select",
        json!({ "selections": {} }),
        "bad_params",
    );
}
