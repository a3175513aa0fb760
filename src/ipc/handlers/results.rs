use crate::calc::{self, AggregatePolicy, StudentAggregate};
use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, load_schemes, parse_scope, required_str, scoped_filter, store_err, Scope,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;
use std::collections::HashMap;

/// Aggregate rows with the student's display name merged in.
fn named_rows(rows: &[StudentAggregate], names: &HashMap<String, String>) -> Vec<serde_json::Value> {
    rows.iter()
        .map(|a| {
            let mut v = json!(a);
            v["displayName"] = json!(names.get(&a.student_id));
            v
        })
        .collect()
}

fn handle_results_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
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

    // Position is relative to everyone in the scope, not just this student.
    let ranked = calc::rank(calc::aggregate_students(
        &records,
        &schemes,
        AggregatePolicy::EXAM_VIEW,
    ));
    let aggregate = ranked
        .into_iter()
        .find(|a| a.student_id == student_id)
        .unwrap_or_else(|| StudentAggregate::empty(&student_id));
    let marks: Vec<_> = records
        .into_iter()
        .filter(|r| r.student_id == student_id)
        .collect();

    ok(
        &req.id,
        json!({
            "scope": scope.to_json(),
            "aggregate": aggregate,
            "marks": marks
        }),
    )
}

fn handle_results_report_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam = match store::exam_info(conn, &exam_id) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let cfg = match config::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let schemes = match load_schemes(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = Scope::Exam(exam);
    let records = match store::find_marks(conn, &scope.filter()) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let mut card = calc::report_card(&student_id, &records, &schemes, cfg.report_card_policy());
    // The card's own points and division follow the report-card policy; the
    // position comes from the ordinary exam ranking.
    let ranked = calc::rank(calc::aggregate_students(
        &records,
        &schemes,
        AggregatePolicy::EXAM_VIEW,
    ));
    if let Some(placed) = ranked.iter().find(|a| a.student_id == student_id) {
        card.aggregate.position = placed.position;
        card.aggregate.out_of = placed.out_of;
    }

    let subjects = match store::subject_labels(conn, scope.school_id()) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let mut body = json!(card);
    if let Some(lines) = body.get_mut("lines").and_then(|v| v.as_array_mut()) {
        for line in lines {
            let label = line
                .get("subjectId")
                .and_then(|v| v.as_str())
                .and_then(|id| subjects.get(id));
            line["subjectCode"] = json!(label.map(|(code, _)| code));
            line["subjectName"] = json!(label.map(|(_, name)| name));
        }
    }

    ok(
        &req.id,
        json!({
            "scope": scope.to_json(),
            "reportCard": body
        }),
    )
}

fn handle_results_rankings(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = match parse_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cfg = match config::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let limit = match req.params.get("limit") {
        None | Some(serde_json::Value::Null) => cfg.top_bottom_count,
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => n as usize,
            _ => return err(&req.id, "bad_params", "limit must be a positive integer", None),
        },
    };
    let schemes = match load_schemes(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let records = match store::find_marks(conn, &scoped_filter(&scope, req)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let names = match store::student_names(conn, scope.school_id()) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let ranked = calc::rank(calc::aggregate_students(
        &records,
        &schemes,
        AggregatePolicy::EXAM_VIEW,
    ));
    let top = calc::top_n(&ranked, limit);
    let bottom = calc::bottom_n(&ranked, limit);

    ok(
        &req.id,
        json!({
            "scope": scope.to_json(),
            "classLevel": req.params.get("classLevel").cloned().unwrap_or(serde_json::Value::Null),
            "outOf": ranked.len(),
            "rows": named_rows(&ranked, &names),
            "top": named_rows(&top, &names),
            "bottom": named_rows(&bottom, &names)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.student" => Some(handle_results_student(state, req)),
        "results.reportCard" => Some(handle_results_report_card(state, req)),
        "results.rankings" => Some(handle_results_rankings(state, req)),
        _ => None,
    }
}
