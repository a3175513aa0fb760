mod test_support;

use rusqlite::Connection;
use serde_json::json;
use test_support::{
    error_code, put_mark, request, request_ok, seed_registry, select_workspace, spawn_sidecar,
    EXAM_1, SCHOOL_CODE, SCHOOL_ID, YEAR,
};

fn mark_field<'a>(res: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    res.get("mark").and_then(|m| m.get(key))
}

#[test]
fn raw_marks_keep_first_value_while_marks_follow_edits() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_workspace(&mut stdin, &mut reader, "resultsd-marks-raw");
    seed_registry(&mut stdin, &mut reader);

    let first = put_mark(&mut stdin, &mut reader, EXAM_1, "stu-1", "math", json!(60));
    assert_eq!(mark_field(&first, "rawMarks"), Some(&json!(60)));
    assert_eq!(mark_field(&first, "marks"), Some(&json!(60)));
    assert_eq!(mark_field(&first, "standardizedMarks"), Some(&json!(60)));
    assert_eq!(mark_field(&first, "grade"), Some(&json!("C")));
    assert_eq!(mark_field(&first, "points"), Some(&json!(3)));
    assert_eq!(mark_field(&first, "academicYear"), Some(&json!("2025")));
    assert_eq!(mark_field(&first, "classLevel"), Some(&json!("Form 1")));

    let edited = put_mark(&mut stdin, &mut reader, EXAM_1, "stu-1", "math", json!(80));
    assert_eq!(mark_field(&edited, "rawMarks"), Some(&json!(60)));
    assert_eq!(mark_field(&edited, "marks"), Some(&json!(80)));
    assert_eq!(mark_field(&edited, "standardizedMarks"), Some(&json!(80)));
    assert_eq!(mark_field(&edited, "grade"), Some(&json!("A")));
    assert_eq!(mark_field(&edited, "points"), Some(&json!(1)));

    let cleared = put_mark(&mut stdin, &mut reader, EXAM_1, "stu-1", "math", json!(null));
    assert_eq!(mark_field(&cleared, "rawMarks"), Some(&json!(60)));
    assert!(mark_field(&cleared, "marks").map(|v| v.is_null()).unwrap_or(false));
    assert!(mark_field(&cleared, "grade").map(|v| v.is_null()).unwrap_or(false));
    assert!(mark_field(&cleared, "points").map(|v| v.is_null()).unwrap_or(false));

    // A row created empty takes its first real value as raw.
    let empty = put_mark(&mut stdin, &mut reader, EXAM_1, "stu-1", "eng", json!(null));
    assert!(mark_field(&empty, "rawMarks").map(|v| v.is_null()).unwrap_or(false));
    let filled = put_mark(&mut stdin, &mut reader, EXAM_1, "stu-1", "eng", json!(44));
    assert_eq!(mark_field(&filled, "rawMarks"), Some(&json!(44)));
    assert_eq!(mark_field(&filled, "grade"), Some(&json!("D")));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "marks.list",
        json!({ "filter": { "examId": EXAM_1, "studentId": "stu-1" } }),
    );
    let rows = listed
        .get("marks")
        .and_then(|v| v.as_array())
        .expect("marks[]");
    assert_eq!(rows.len(), 2);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn upsert_rejects_out_of_range_and_mismatched_keys() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_workspace(&mut stdin, &mut reader, "resultsd-marks-validation");
    seed_registry(&mut stdin, &mut reader);

    let base = json!({
        "examId": EXAM_1,
        "studentId": "stu-1",
        "subjectId": "sub-math",
        "schoolId": SCHOOL_ID
    });
    let with = |marks: serde_json::Value| {
        let mut p = base.clone();
        p["marks"] = marks;
        p
    };

    let too_high = request(&mut stdin, &mut reader, "1", "marks.upsert", with(json!(101)));
    assert_eq!(error_code(&too_high), Some("bad_params"));
    let negative = request(&mut stdin, &mut reader, "2", "marks.upsert", with(json!(-1)));
    assert_eq!(error_code(&negative), Some("bad_params"));
    let fractional = request(&mut stdin, &mut reader, "3", "marks.upsert", with(json!(55.5)));
    assert_eq!(error_code(&fractional), Some("bad_params"));
    let missing = request(&mut stdin, &mut reader, "4", "marks.upsert", base.clone());
    assert_eq!(error_code(&missing), Some("bad_params"));

    let mut wrong_school = with(json!(50));
    wrong_school["schoolId"] = json!("sch-other");
    let res = request(&mut stdin, &mut reader, "5", "marks.upsert", wrong_school);
    assert_eq!(error_code(&res), Some("bad_params"));

    let mut unknown_student = with(json!(50));
    unknown_student["studentId"] = json!("stu-missing");
    let res = request(&mut stdin, &mut reader, "6", "marks.upsert", unknown_student);
    assert_eq!(error_code(&res), Some("not_found"));

    let mut unknown_exam = with(json!(50));
    unknown_exam["examId"] = json!("exam-missing");
    let res = request(&mut stdin, &mut reader, "7", "marks.upsert", unknown_exam);
    assert_eq!(error_code(&res), Some("not_found"));

    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "marks.bulkUpsert",
        json!({
            "examId": EXAM_1,
            "schoolId": SCHOOL_ID,
            "entries": [
                { "studentId": "stu-1", "subjectId": "sub-math", "marks": 70 },
                { "studentId": "stu-1", "subjectId": "sub-eng", "marks": 170 },
                "not an object",
                { "subjectId": "sub-bio", "marks": 40 }
            ]
        }),
    );
    assert_eq!(bulk.get("updated").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(bulk.get("rejected").and_then(|v| v.as_u64()), Some(3));
    let indexes: Vec<u64> = bulk
        .get("errors")
        .and_then(|v| v.as_array())
        .expect("errors[]")
        .iter()
        .filter_map(|e| e.get("index").and_then(|v| v.as_u64()))
        .collect();
    assert_eq!(indexes, vec![1, 2, 3]);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn bulk_upsert_over_limit_is_rejected_whole() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_workspace(&mut stdin, &mut reader, "resultsd-marks-limit");

    let entries: Vec<serde_json::Value> = (0..5001)
        .map(|i| json!({ "studentId": format!("stu-{}", i), "subjectId": "sub-math", "marks": 50 }))
        .collect();
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marks.bulkUpsert",
        json!({ "examId": EXAM_1, "schoolId": SCHOOL_ID, "entries": entries }),
    );
    assert_eq!(res.get("updated").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(res.get("rejected").and_then(|v| v.as_u64()), Some(5001));
    assert_eq!(res.get("limitExceeded").and_then(|v| v.as_bool()), Some(true));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn saving_a_mark_writes_the_student_snapshot() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = select_workspace(&mut stdin, &mut reader, "resultsd-marks-snapshot");
    seed_registry(&mut stdin, &mut reader);

    put_mark(&mut stdin, &mut reader, EXAM_1, "stu-1", "math", json!(80));
    put_mark(&mut stdin, &mut reader, EXAM_1, "stu-1", "eng", json!(70));
    put_mark(&mut stdin, &mut reader, EXAM_1, "stu-1", "bio", json!(50));

    let path = workspace
        .join("snapshots")
        .join(SCHOOL_CODE)
        .join(YEAR)
        .join("MT1")
        .join("stu-1.json");
    let text = std::fs::read_to_string(&path).expect("read snapshot");
    let snap: serde_json::Value = serde_json::from_str(&text).expect("parse snapshot");
    assert_eq!(snap.get("examNumber"), Some(&json!("MT1")));
    assert_eq!(snap.get("studentId"), Some(&json!("stu-1")));
    assert_eq!(
        snap.get("marks").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(3)
    );
    let agg = snap.get("aggregate").expect("aggregate");
    assert_eq!(agg.get("total"), Some(&json!(200)));
    assert_eq!(agg.get("average"), Some(&json!(66.67)));
    assert_eq!(agg.get("division"), Some(&json!("Division II")));

    let bundle = workspace.join("out").join("bundle.zip");
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "export",
        "snapshots.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export.get("fileCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        export.get("bundleFormat").and_then(|v| v.as_str()),
        Some("results-snapshots-v1")
    );

    let file = std::fs::File::open(&bundle).expect("open bundle");
    let mut zip = zip::ZipArchive::new(file).expect("read zip");
    let manifest: serde_json::Value = {
        let entry = zip.by_name("manifest.json").expect("manifest entry");
        serde_json::from_reader(entry).expect("parse manifest")
    };
    assert!(manifest
        .get("files")
        .and_then(|f| f.get("S0101/2025/MT1/stu-1.json"))
        .and_then(|v| v.as_str())
        .is_some());
    assert!(zip.by_name("snapshots/S0101/2025/MT1/stu-1.json").is_ok());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn reopening_a_workspace_backfills_missing_raw_marks() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = select_workspace(&mut stdin, &mut reader, "resultsd-marks-backfill");
    seed_registry(&mut stdin, &mut reader);
    put_mark(&mut stdin, &mut reader, EXAM_1, "stu-1", "math", json!(55));

    {
        let conn = Connection::open(workspace.join("results.sqlite3")).expect("open db");
        conn.execute("UPDATE marks SET raw_marks = NULL", [])
            .expect("clear raw marks");
    }

    request_ok(
        &mut stdin,
        &mut reader,
        "reopen",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "marks.list",
        json!({ "filter": { "studentId": "stu-1" } }),
    );
    let row = listed
        .get("marks")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .expect("one mark");
    assert_eq!(row.get("rawMarks"), Some(&json!(55)));

    drop(stdin);
    let _ = child.wait();
}
