mod test_support;

use serde_json::json;
use test_support::Fixture;

fn roster_entry<'a>(data: &'a serde_json::Value, roll: &str) -> &'a serde_json::Value {
    data["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|s| s["rollNo"] == json!(roll))
        .unwrap_or_else(|| panic!("student {} missing", roll))
}

#[test]
fn class_data_reports_per_subject_status_and_rounded_percentage() {
    let mut fx = Fixture::new("classtrack-roster-pct");
    let f0 = fx.faculty[0].clone();
    let f1 = fx.faculty[1].clone();
    let theory = fx.add_subject("Operating Systems", "CS301", "theory", json!([{ "facultyId": f0 }]));
    let practical = fx.add_subject("OS Lab", "CS301L", "practical", json!([{ "facultyId": f1 }]));

    let ids = fx.import(
        "roll_no,hall_ticket_no,name,attendance\n\
         22CS001,HT001,Asha Rao,82\n\
         22CS002,HT002,Vikram N,60\n",
    );
    assert_eq!(ids.len(), 2);
    let (asha, vikram) = (ids[0].clone(), ids[1].clone());

    for (student, subject, kind) in [
        (&asha, &theory, "ta"),
        (&asha, &practical, "ta"),
        (&vikram, &theory, "defaulter"),
    ] {
        fx.teacher_ok(
            "submissions.update",
            json!({ "studentId": student, "subjectId": subject, "kind": kind, "status": "completed" }),
        );
    }

    let data = fx.teacher_ok("classData.get", json!({}));
    assert_eq!(data["class"]["name"], json!("CSE 3A"));
    assert_eq!(data["class"]["studentCount"], json!(2));

    let a = roster_entry(&data, "22CS001");
    assert_eq!(a["isDefaulter"], json!(false));
    assert_eq!(a["completed"], json!(2));
    assert_eq!(a["total"], json!(3));
    assert_eq!(a["submissionPercentage"], json!(67));
    let subs = a["submissions"].as_array().expect("submissions");
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0]["subjectCode"], json!("CS301"));
    assert_eq!(subs[0]["ta"], json!("completed"));
    assert_eq!(subs[0]["cie"], json!("pending"));
    assert_eq!(subs[0]["defaulter"], json!("-"));
    assert_eq!(subs[0]["submissionPercentage"], json!(50));
    assert_eq!(subs[1]["subjectCode"], json!("CS301L"));
    assert_eq!(subs[1]["cie"], json!("N/A"));
    assert_eq!(subs[1]["defaulter"], json!("-"));
    assert_eq!(subs[1]["submissionPercentage"], json!(100));

    let v = roster_entry(&data, "22CS002");
    assert_eq!(v["isDefaulter"], json!(true));
    assert_eq!(v["completed"], json!(1));
    assert_eq!(v["total"], json!(4));
    assert_eq!(v["submissionPercentage"], json!(25));
    assert_eq!(v["submissions"][0]["defaulter"], json!("completed"));
    assert_eq!(v["submissions"][1]["defaulter"], json!("-"));

    // Clearing the defaulter flag drops the third item; its old record no
    // longer counts.
    let updated = fx.teacher_ok(
        "students.update",
        json!({ "studentId": vikram, "patch": { "attendance": 91.5 } }),
    );
    assert_eq!(updated["student"]["isDefaulter"], json!(false));
    assert_eq!(updated["student"]["submissionPercentage"], json!(0));

    let listed = fx.teacher_ok("students.list", json!({}));
    let v = roster_entry(&listed, "22CS002");
    assert_eq!(v["total"], json!(3));
    assert_eq!(v["completed"], json!(0));
    assert!(v.get("submissions").is_none());
}

#[test]
fn submission_updates_respect_item_applicability_and_faculty_scope() {
    let mut fx = Fixture::new("classtrack-roster-updates");
    let f0 = fx.faculty[0].clone();
    let f1 = fx.faculty[1].clone();
    let theory = fx.add_subject("Compilers", "CS302", "theory", json!([{ "facultyId": f0 }]));
    let practical = fx.add_subject("Compilers Lab", "CS302L", "practical", json!([{ "facultyId": f1 }]));
    let ids = fx.import("roll_no,name\n22CS001,Asha Rao\n");
    let asha = ids[0].clone();
    let class_id = fx.class_id.clone();

    fx.teacher_fails(
        "submissions.update",
        json!({ "studentId": asha, "subjectId": practical, "kind": "cie", "status": "completed" }),
        "bad_params",
    );
    fx.teacher_fails(
        "submissions.update",
        json!({ "studentId": asha, "subjectId": theory, "kind": "defaulter", "status": "completed" }),
        "bad_params",
    );
    fx.teacher_fails(
        "submissions.update",
        json!({ "studentId": asha, "subjectId": theory, "kind": "ta", "status": "done" }),
        "bad_params",
    );

    // The lab faculty does not grade the theory subject.
    let denied = fx.as_faculty(
        1,
        "submissions.update",
        json!({ "classId": class_id, "studentId": asha, "subjectId": theory, "kind": "ta", "status": "completed" }),
    );
    assert_eq!(denied["code"], json!("forbidden"));

    fx.faculty_ok(
        0,
        "submissions.update",
        json!({ "classId": class_id, "studentId": asha, "subjectId": theory, "kind": "ta", "status": "completed" }),
    );
    let second = fx.faculty_ok(
        0,
        "submissions.update",
        json!({ "classId": class_id, "studentId": asha, "subjectId": theory, "kind": "cie", "status": "completed" }),
    );
    assert_eq!(second["progress"]["ta"], json!("completed"));
    assert_eq!(second["progress"]["cie"], json!("completed"));
    assert_eq!(second["progress"]["submissionPercentage"], json!(100));

    // Setting an item back to pending overwrites the same record.
    let reverted = fx.faculty_ok(
        0,
        "submissions.update",
        json!({ "classId": class_id, "studentId": asha, "subjectId": theory, "kind": "cie", "status": "pending" }),
    );
    assert_eq!(reverted["progress"]["completed"], json!(1));
    assert_eq!(reverted["progress"]["submissionPercentage"], json!(50));
}
