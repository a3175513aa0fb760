use crate::calc::{aggregate_student, AggregatePolicy};
use crate::grading::GradingScheme;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, load_schemes, optional_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::snapshot;
use crate::store::{self, MarkFilter, MarkKey, StoreError};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;

const MARKS_BULK_MAX_ENTRIES: usize = 5000;

/// `null` clears a mark. Whole numbers only; fractional marks are rejected
/// rather than rounded.
fn parse_marks(v: Option<&serde_json::Value>) -> Result<Option<i64>, StoreError> {
    match v {
        None => Err(StoreError::new(
            "bad_params",
            "missing marks (use null to clear)",
        )),
        Some(serde_json::Value::Null) => Ok(None),
        Some(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Some(i));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Some(f as i64)),
                _ => Err(StoreError::new("bad_params", "marks must be a whole number or null")
                    .with_details(json!({ "marks": n }))),
            }
        }
    }
}

fn entry_str(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    fallback: Option<&String>,
) -> Result<String, StoreError> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.cloned())
        .ok_or_else(|| StoreError::new("bad_params", format!("missing {}", key)))
}

fn parse_entry(
    obj: &serde_json::Map<String, serde_json::Value>,
    default_exam: Option<&String>,
    default_school: Option<&String>,
) -> Result<(MarkKey, Option<i64>), StoreError> {
    let key = MarkKey {
        exam_id: entry_str(obj, "examId", default_exam)?,
        student_id: entry_str(obj, "studentId", None)?,
        subject_id: entry_str(obj, "subjectId", None)?,
        school_id: entry_str(obj, "schoolId", default_school)?,
    };
    let marks = parse_marks(obj.get("marks"))?;
    Ok((key, marks))
}

/// Rewrites the student's snapshot for one exam. Never fails the caller.
fn refresh_snapshot(
    conn: &Connection,
    workspace: &Path,
    schemes: &[GradingScheme],
    exam_id: &str,
    student_id: &str,
) {
    let result = (|| -> anyhow::Result<std::path::PathBuf> {
        let exam = store::exam_info(conn, exam_id).map_err(|e| anyhow::anyhow!(e.message))?;
        let filter = MarkFilter {
            exam_id: Some(exam_id.to_string()),
            student_id: Some(student_id.to_string()),
            ..MarkFilter::default()
        };
        let rows = store::find_marks(conn, &filter).map_err(|e| anyhow::anyhow!(e.message))?;
        let aggregate = aggregate_student(student_id, &rows, schemes, AggregatePolicy::EXAM_VIEW);
        snapshot::write_student_snapshot(workspace, &exam, student_id, &rows, &aggregate)
    })();
    match result {
        Ok(path) => tracing::debug!(path = %path.to_string_lossy(), "snapshot written"),
        Err(e) => tracing::warn!(
            error = %format!("{e:#}"),
            exam_id,
            student_id,
            "snapshot write failed"
        ),
    }
}

fn handle_marks_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(obj) = req.params.as_object() else {
        return err(&req.id, "bad_params", "params must be an object", None);
    };
    let (key, marks) = match parse_entry(obj, None, None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let schemes = match load_schemes(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let record = match store::upsert_mark(conn, &key, marks, &schemes) {
        Ok(r) => r,
        Err(e) => return store_err(req, e),
    };
    tracing::debug!(
        exam_id = %key.exam_id,
        student_id = %key.student_id,
        subject_id = %key.subject_id,
        marks = ?marks,
        "mark saved"
    );
    if let Some(ws) = state.workspace.as_deref() {
        refresh_snapshot(conn, ws, &schemes, &key.exam_id, &key.student_id);
    }
    ok(&req.id, json!({ "mark": record }))
}

fn handle_marks_bulk_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries[]", None);
    };
    if entries.len() > MARKS_BULK_MAX_ENTRIES {
        let rejected = entries.len();
        return ok(
            &req.id,
            json!({
                "updated": 0,
                "rejected": rejected,
                "limitExceeded": true,
                "errors": [{
                    "index": -1,
                    "code": "too_many_entries",
                    "message": format!(
                        "bulk payload exceeds max entries: {} > {}",
                        rejected, MARKS_BULK_MAX_ENTRIES
                    )
                }]
            }),
        );
    }

    let default_exam = optional_str(req, "examId");
    let default_school = optional_str(req, "schoolId");
    let schemes = match load_schemes(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut updated: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    let mut touched: BTreeSet<(String, String)> = BTreeSet::new();

    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("entry at index {} must be an object", i),
            }));
            continue;
        };
        let (key, marks) = match parse_entry(obj, default_exam.as_ref(), default_school.as_ref()) {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({ "index": i, "code": e.code, "message": e.message }));
                continue;
            }
        };
        match store::upsert_mark(conn, &key, marks, &schemes) {
            Ok(_) => {
                updated += 1;
                touched.insert((key.exam_id, key.student_id));
            }
            Err(e) => errors.push(json!({ "index": i, "code": e.code, "message": e.message })),
        }
    }

    if let Some(ws) = state.workspace.as_deref() {
        for (exam_id, student_id) in &touched {
            refresh_snapshot(conn, ws, &schemes, exam_id, student_id);
        }
    }
    tracing::info!(updated, rejected = errors.len(), "bulk mark upsert");

    let mut result = json!({ "updated": updated });
    if !errors.is_empty() {
        result["rejected"] = json!(errors.len());
        result["errors"] = json!(errors);
    }
    ok(&req.id, result)
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = match store::parse_mark_filter(req.params.get("filter")) {
        Ok(f) => f,
        Err(e) => return store_err(req, e),
    };
    match store::find_marks(conn, &filter) {
        Ok(marks) => ok(&req.id, json!({ "marks": marks })),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.upsert" => Some(handle_marks_upsert(state, req)),
        "marks.bulkUpsert" => Some(handle_marks_bulk_upsert(state, req)),
        "marks.list" => Some(handle_marks_list(state, req)),
        _ => None,
    }
}
