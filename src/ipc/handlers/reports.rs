use crate::calc::{self, DivisionCounts, GroupAggregate, GroupBy};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, load_schemes, optional_str, parse_scope, required_str, scoped_filter, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, MarkFilter};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

fn exam_ids_by_number(
    conn: &Connection,
    academic_year: &str,
    exam_number: &str,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id FROM exams WHERE academic_year = ? AND exam_number = ? ORDER BY school_id",
    )?;
    let ids = stmt
        .query_map((academic_year, exam_number), |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn handle_reports_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = match parse_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let schemes = match load_schemes(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let records = match store::find_marks(conn, &scoped_filter(&scope, req)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let classes = calc::aggregate_groups(&records, |r| GroupBy::ClassLevel.key(r), &schemes);
    ok(
        &req.id,
        json!({
            "scope": scope.to_json(),
            "classes": classes
        }),
    )
}

/// Cross-school comparison for one academic year, optionally narrowed to
/// the exams sharing one exam number.
fn handle_reports_schools(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_number = optional_str(req, "examNumber");
    let schemes = match load_schemes(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exam_ids = match &exam_number {
        Some(n) => match exam_ids_by_number(conn, &academic_year, n) {
            Ok(ids) => Some(ids),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        None => None,
    };
    let filter = MarkFilter {
        academic_year: Some(academic_year.clone()),
        exam_ids,
        class_level: optional_str(req, "classLevel"),
        ..MarkFilter::default()
    };
    let records = match store::find_marks(conn, &filter) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let labels = match store::school_labels(conn) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let schools: Vec<serde_json::Value> =
        calc::aggregate_groups(&records, |r| GroupBy::School.key(r), &schemes)
            .into_iter()
            .map(|g| {
                let label = labels.get(&g.key);
                let mut v = json!(g);
                v["schoolCode"] = json!(label.map(|(code, _)| code));
                v["schoolName"] = json!(label.map(|(_, name)| name));
                v
            })
            .collect();
    ok(
        &req.id,
        json!({
            "academicYear": academic_year,
            "examNumber": exam_number,
            "schools": schools
        }),
    )
}

fn handle_reports_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = match parse_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let schemes = match load_schemes(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let records = match store::find_marks(conn, &scoped_filter(&scope, req)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let labels = match store::subject_labels(conn, scope.school_id()) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let divisions: HashMap<String, GroupAggregate> =
        calc::aggregate_groups(&records, |r| GroupBy::Subject.key(r), &schemes)
            .into_iter()
            .map(|g| (g.key.clone(), g))
            .collect();
    let subjects: Vec<serde_json::Value> = calc::aggregate_subjects(&records, &schemes)
        .into_iter()
        .map(|s| {
            let label = labels.get(&s.subject_id);
            let group = divisions.get(&s.subject_id);
            let mut v = json!(s);
            v["subjectCode"] = json!(label.map(|(code, _)| code));
            v["subjectName"] = json!(label.map(|(_, name)| name));
            v["divisions"] = json!(group.map(|g| g.divisions));
            v["passRate"] = json!(group.map(|g| g.pass_rate));
            v
        })
        .collect();

    ok(
        &req.id,
        json!({
            "scope": scope.to_json(),
            "subjects": subjects
        }),
    )
}

/// One group aggregate per exam of the year, in exam order. Exams without
/// marks still appear, with zero candidates.
fn handle_reports_exam_trend(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exams = match store::list_exams(conn, &school_id, &academic_year) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let schemes = match load_schemes(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = MarkFilter {
        school_id: Some(school_id.clone()),
        academic_year: Some(academic_year.clone()),
        class_level: optional_str(req, "classLevel"),
        ..MarkFilter::default()
    };
    let records = match store::find_marks(conn, &filter) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let mut by_exam: HashMap<String, GroupAggregate> =
        calc::aggregate_groups(&records, |r| GroupBy::Exam.key(r), &schemes)
            .into_iter()
            .map(|g| (g.key.clone(), g))
            .collect();
    let points: Vec<serde_json::Value> = exams
        .iter()
        .map(|exam| {
            let group = by_exam.remove(&exam.id).unwrap_or_else(|| GroupAggregate {
                key: exam.id.clone(),
                candidates: 0,
                average_mark: None,
                divisions: DivisionCounts::default(),
                pass_rate: 0.0,
            });
            let mut v = json!(group);
            v["examNumber"] = json!(exam.exam_number);
            v["examName"] = json!(exam.name);
            v
        })
        .collect();

    ok(
        &req.id,
        json!({
            "schoolId": school_id,
            "academicYear": academic_year,
            "exams": points
        }),
    )
}

fn handle_reports_student_trend(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id: Option<String> = match conn
        .query_row(
            "SELECT school_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(school_id) = school_id else {
        return err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        );
    };

    let exams = match store::list_exams(conn, &school_id, &academic_year) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let schemes = match load_schemes(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = MarkFilter {
        school_id: Some(school_id.clone()),
        academic_year: Some(academic_year.clone()),
        ..MarkFilter::default()
    };
    let records = match store::find_marks(conn, &filter) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let exam_ids: Vec<String> = exams.iter().map(|e| e.id.clone()).collect();
    let by_id: HashMap<&str, &store::ExamInfo> = exams.iter().map(|e| (e.id.as_str(), e)).collect();
    let trend: Vec<serde_json::Value> =
        calc::student_trend(&student_id, &records, &exam_ids, &schemes)
            .into_iter()
            .map(|p| {
                let exam = by_id.get(p.exam_id.as_str());
                let mut v = json!(p);
                v["examNumber"] = json!(exam.map(|e| &e.exam_number));
                v["examName"] = json!(exam.map(|e| &e.name));
                v
            })
            .collect();

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "schoolId": school_id,
            "academicYear": academic_year,
            "trend": trend
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classes" => Some(handle_reports_classes(state, req)),
        "reports.schools" => Some(handle_reports_schools(state, req)),
        "reports.subjects" => Some(handle_reports_subjects(state, req)),
        "reports.examTrend" => Some(handle_reports_exam_trend(state, req)),
        "reports.studentTrend" => Some(handle_reports_student_trend(state, req)),
        _ => None,
    }
}
