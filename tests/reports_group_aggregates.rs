mod test_support;

use serde_json::json;
use test_support::{
    request_ok, seed_exam_1, seed_exam_2, seed_registry, select_workspace, spawn_sidecar, EXAM_1,
    SCHOOL_CODE, SCHOOL_ID, YEAR,
};

fn find<'a>(rows: &'a [serde_json::Value], key: &str, value: &str) -> &'a serde_json::Value {
    rows.iter()
        .find(|r| r.get(key).and_then(|v| v.as_str()) == Some(value))
        .unwrap_or_else(|| panic!("no row with {} = {}", key, value))
}

#[test]
fn class_report_counts_divisions_per_class_level() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_workspace(&mut stdin, &mut reader, "resultsd-reports-classes");
    seed_registry(&mut stdin, &mut reader);
    seed_exam_1(&mut stdin, &mut reader);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.classes",
        json!({ "examId": EXAM_1 }),
    );
    let classes = res.get("classes").and_then(|v| v.as_array()).expect("classes[]");
    assert_eq!(classes.len(), 2);
    assert_eq!(classes[0].get("key").and_then(|v| v.as_str()), Some("Form 1"));

    let form1 = &classes[0];
    assert_eq!(form1.get("candidates").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(form1.get("averageMark").and_then(|v| v.as_f64()), Some(50.56));
    assert_eq!(
        form1.get("divisions"),
        Some(&json!({ "I": 0, "II": 2, "III": 0, "IV": 0, "0": 1 }))
    );
    assert_eq!(form1.get("passRate").and_then(|v| v.as_f64()), Some(66.7));

    let form2 = &classes[1];
    assert_eq!(form2.get("candidates").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(form2.get("averageMark").and_then(|v| v.as_f64()), Some(85.0));
    assert_eq!(form2["divisions"].get("I").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(form2.get("passRate").and_then(|v| v.as_f64()), Some(100.0));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn subject_report_separates_sat_from_pass_and_fail() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_workspace(&mut stdin, &mut reader, "resultsd-reports-subjects");
    seed_registry(&mut stdin, &mut reader);
    seed_exam_1(&mut stdin, &mut reader);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.subjects",
        json!({ "examId": EXAM_1 }),
    );
    let subjects = res.get("subjects").and_then(|v| v.as_array()).expect("subjects[]");
    assert_eq!(subjects.len(), 4);

    let math = find(subjects, "subjectId", "sub-math");
    assert_eq!(math.get("subjectCode").and_then(|v| v.as_str()), Some("MATH"));
    assert_eq!(math.get("sat").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(math.get("pass").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(math.get("fail").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(math.get("averageMark").and_then(|v| v.as_f64()), Some(71.25));
    assert_eq!(math.get("gpa").and_then(|v| v.as_f64()), Some(2.0));
    assert_eq!(
        math.get("competency").and_then(|v| v.as_str()),
        Some("Grade B (Very Good)")
    );
    assert_eq!(math.get("gradeCounts"), Some(&json!({ "A": 3, "F": 1 })));
    assert_eq!(math.get("passRate").and_then(|v| v.as_f64()), Some(75.0));

    // Only an empty entry: sat, but neither passed nor failed.
    let geo = find(subjects, "subjectId", "sub-geo");
    assert_eq!(geo.get("sat").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(geo.get("pass").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(geo.get("fail").and_then(|v| v.as_u64()), Some(0));
    assert!(geo.get("gpa").map(|v| v.is_null()).unwrap_or(false));
    assert!(geo.get("competency").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(geo.get("passRate").and_then(|v| v.as_f64()), Some(0.0));

    let form2 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.subjects",
        json!({ "examId": EXAM_1, "classLevel": "Form 2" }),
    );
    let rows = form2.get("subjects").and_then(|v| v.as_array()).expect("subjects[]");
    assert_eq!(rows.len(), 3);
    assert_eq!(
        find(rows, "subjectId", "sub-bio").get("gpa").and_then(|v| v.as_f64()),
        Some(1.0)
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn school_and_exam_trend_reports_follow_the_year() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_workspace(&mut stdin, &mut reader, "resultsd-reports-schools");
    seed_registry(&mut stdin, &mut reader);
    seed_exam_1(&mut stdin, &mut reader);
    seed_exam_2(&mut stdin, &mut reader);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.schools",
        json!({ "academicYear": YEAR, "examNumber": "MT1" }),
    );
    let schools = res.get("schools").and_then(|v| v.as_array()).expect("schools[]");
    assert_eq!(schools.len(), 1);
    let school = &schools[0];
    assert_eq!(school.get("key").and_then(|v| v.as_str()), Some(SCHOOL_ID));
    assert_eq!(school.get("schoolCode").and_then(|v| v.as_str()), Some(SCHOOL_CODE));
    assert_eq!(school.get("candidates").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(school.get("averageMark").and_then(|v| v.as_f64()), Some(59.17));
    assert_eq!(school.get("passRate").and_then(|v| v.as_f64()), Some(75.0));

    let other_year = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.schools",
        json!({ "academicYear": "2024" }),
    );
    assert_eq!(
        other_year.get("schools").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // An exam with no marks yet still shows up in the trend.
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exams.upsert",
        json!({
            "id": "exam-3",
            "schoolId": SCHOOL_ID,
            "academicYear": YEAR,
            "examNumber": "T2",
            "sortOrder": 3
        }),
    );
    let trend = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.examTrend",
        json!({ "schoolId": SCHOOL_ID, "academicYear": YEAR }),
    );
    let exams = trend.get("exams").and_then(|v| v.as_array()).expect("exams[]");
    let numbers: Vec<&str> = exams
        .iter()
        .filter_map(|e| e.get("examNumber").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(numbers, vec!["MT1", "T1", "T2"]);
    assert_eq!(exams[0].get("candidates").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(exams[1].get("candidates").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(exams[1].get("averageMark").and_then(|v| v.as_f64()), Some(58.44));
    assert_eq!(exams[2].get("candidates").and_then(|v| v.as_u64()), Some(0));
    assert!(exams[2].get("averageMark").map(|v| v.is_null()).unwrap_or(false));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn moving_an_exam_to_another_year_carries_its_marks() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_workspace(&mut stdin, &mut reader, "resultsd-reports-exam-moved");
    seed_registry(&mut stdin, &mut reader);
    seed_exam_1(&mut stdin, &mut reader);

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.upsert",
        json!({
            "id": EXAM_1,
            "schoolId": SCHOOL_ID,
            "academicYear": "2026",
            "examNumber": "MT1",
            "sortOrder": 1
        }),
    );
    assert_eq!(moved.get("marksMoved").and_then(|v| v.as_u64()), Some(13));

    let by_exam = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.rankings",
        json!({ "examId": EXAM_1 }),
    );
    assert_eq!(by_exam.get("outOf").and_then(|v| v.as_u64()), Some(4));
    let by_year = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.rankings",
        json!({ "schoolId": SCHOOL_ID, "academicYear": "2026" }),
    );
    assert_eq!(by_year.get("outOf").and_then(|v| v.as_u64()), Some(4));
    let old_year = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "results.rankings",
        json!({ "schoolId": SCHOOL_ID, "academicYear": YEAR }),
    );
    assert_eq!(old_year.get("outOf").and_then(|v| v.as_u64()), Some(0));

    let trend = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.examTrend",
        json!({ "schoolId": SCHOOL_ID, "academicYear": "2026" }),
    );
    let exams = trend.get("exams").and_then(|v| v.as_array()).expect("exams[]");
    assert_eq!(exams.len(), 1);
    assert_eq!(exams[0].get("candidates").and_then(|v| v.as_u64()), Some(4));

    // Re-saving the exam unchanged touches no marks.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exams.upsert",
        json!({
            "id": EXAM_1,
            "schoolId": SCHOOL_ID,
            "academicYear": "2026",
            "examNumber": "MT1",
            "sortOrder": 1
        }),
    );
    assert_eq!(again.get("marksMoved").and_then(|v| v.as_u64()), Some(0));

    drop(stdin);
    let _ = child.wait();
}
