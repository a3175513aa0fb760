#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SCHOOL_ID: &str = "sch-1";
pub const SCHOOL_CODE: &str = "S0101";
pub const YEAR: &str = "2025";
pub const EXAM_1: &str = "exam-1";
pub const EXAM_2: &str = "exam-2";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

/// One school, one academic year, two exams, eight subjects and four
/// students (three in Form 1, one in Form 2).
pub fn seed_registry(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    request_ok(
        stdin,
        reader,
        "seed-school",
        "schools.upsert",
        json!({ "id": SCHOOL_ID, "code": SCHOOL_CODE, "name": "Mlimani Secondary" }),
    );
    request_ok(
        stdin,
        reader,
        "seed-year",
        "years.upsert",
        json!({ "name": YEAR, "isCurrent": true }),
    );
    for (id, number, order) in [(EXAM_1, "MT1", 1), (EXAM_2, "T1", 2)] {
        request_ok(
            stdin,
            reader,
            &format!("seed-{}", id),
            "exams.upsert",
            json!({
                "id": id,
                "schoolId": SCHOOL_ID,
                "academicYear": YEAR,
                "examNumber": number,
                "name": format!("Exam {}", number),
                "sortOrder": order
            }),
        );
    }
    for code in ["math", "eng", "kisw", "bio", "chem", "phys", "geo", "hist"] {
        request_ok(
            stdin,
            reader,
            &format!("seed-sub-{}", code),
            "subjects.upsert",
            json!({
                "id": format!("sub-{}", code),
                "schoolId": SCHOOL_ID,
                "code": code.to_uppercase(),
                "name": code
            }),
        );
    }
    for (id, last, first, level) in [
        ("stu-1", "Mushi", "Asha", "Form 1"),
        ("stu-2", "Kimaro", "Baraka", "Form 1"),
        ("stu-3", "Lyimo", "Chausiku", "Form 1"),
        ("stu-4", "Massawe", "Daudi", "Form 2"),
    ] {
        request_ok(
            stdin,
            reader,
            &format!("seed-{}", id),
            "students.upsert",
            json!({
                "id": id,
                "schoolId": SCHOOL_ID,
                "classLevel": level,
                "lastName": last,
                "firstName": first
            }),
        );
    }
}

pub fn put_mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    exam_id: &str,
    student_id: &str,
    subject: &str,
    marks: serde_json::Value,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        &format!("mark-{}-{}-{}", exam_id, student_id, subject),
        "marks.upsert",
        json!({
            "examId": exam_id,
            "studentId": student_id,
            "subjectId": format!("sub-{}", subject),
            "schoolId": SCHOOL_ID,
            "marks": marks
        }),
    )
}

/// Exam 1 marks for every student. Averages: stu-4 85.0, stu-1 66.67 with
/// 6 points, stu-2 66.67 with 7 points, stu-3 18.33. stu-2 has an empty
/// geography entry.
pub fn seed_exam_1(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let rows = json!([
        { "studentId": "stu-1", "subjectId": "sub-math", "marks": 80 },
        { "studentId": "stu-1", "subjectId": "sub-eng", "marks": 70 },
        { "studentId": "stu-1", "subjectId": "sub-bio", "marks": 50 },
        { "studentId": "stu-2", "subjectId": "sub-math", "marks": 90 },
        { "studentId": "stu-2", "subjectId": "sub-eng", "marks": 60 },
        { "studentId": "stu-2", "subjectId": "sub-bio", "marks": 50 },
        { "studentId": "stu-2", "subjectId": "sub-geo", "marks": null },
        { "studentId": "stu-3", "subjectId": "sub-math", "marks": 20 },
        { "studentId": "stu-3", "subjectId": "sub-eng", "marks": 25 },
        { "studentId": "stu-3", "subjectId": "sub-bio", "marks": 10 },
        { "studentId": "stu-4", "subjectId": "sub-math", "marks": 95 },
        { "studentId": "stu-4", "subjectId": "sub-eng", "marks": 85 },
        { "studentId": "stu-4", "subjectId": "sub-bio", "marks": 75 }
    ]);
    let res = request_ok(
        stdin,
        reader,
        "seed-exam-1",
        "marks.bulkUpsert",
        json!({ "examId": EXAM_1, "schoolId": SCHOOL_ID, "entries": rows }),
    );
    assert_eq!(res.get("updated").and_then(|v| v.as_u64()), Some(13));
}

/// Exam 2: stu-1 sits eight subjects worth points [1,2,2,3,4,5,1,5]
/// (total 426, average 53.25); stu-2 sits mathematics only with 100.
pub fn seed_exam_2(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let mut entries: Vec<serde_json::Value> = [
        ("math", 80),
        ("eng", 70),
        ("kisw", 66),
        ("bio", 50),
        ("chem", 40),
        ("phys", 20),
        ("geo", 90),
        ("hist", 10),
    ]
    .iter()
    .map(|(subject, marks)| {
        json!({ "studentId": "stu-1", "subjectId": format!("sub-{}", subject), "marks": marks })
    })
    .collect();
    entries.push(json!({ "studentId": "stu-2", "subjectId": "sub-math", "marks": 100 }));
    let res = request_ok(
        stdin,
        reader,
        "seed-exam-2",
        "marks.bulkUpsert",
        json!({ "examId": EXAM_2, "schoolId": SCHOOL_ID, "entries": entries }),
    );
    assert_eq!(res.get("updated").and_then(|v| v.as_u64()), Some(9));
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    workspace
}
