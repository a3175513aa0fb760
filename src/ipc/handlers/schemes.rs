use crate::grading::{self, GradingScheme};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, load_schemes, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

fn parse_rows(req: &Request) -> Result<Vec<GradingScheme>, serde_json::Value> {
    let Some(raw) = req.params.get("schemes") else {
        return Err(err(&req.id, "bad_params", "missing schemes[]", None));
    };
    serde_json::from_value::<Vec<GradingScheme>>(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("invalid schemes: {}", e), None))
}

fn handle_schemes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match load_schemes(conn, req) {
        Ok(schemes) => ok(&req.id, json!({ "schemes": schemes })),
        Err(e) => e,
    }
}

fn handle_schemes_replace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rows = match parse_rows(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let count = match store::replace_schemes(conn, &rows) {
        Ok(n) => n,
        Err(e) => return store_err(req, e),
    };
    let coverage = grading::validate_coverage(&rows);
    if !coverage.is_complete() {
        tracing::warn!(
            gaps = coverage.gaps.len(),
            overlaps = coverage.overlaps.len(),
            "grading scheme does not cover 0..=100 exactly once"
        );
    }
    tracing::info!(rows = count, "grading schemes replaced");
    ok(
        &req.id,
        json!({
            "replaced": count,
            "coverage": coverage,
            "isComplete": coverage.is_complete()
        }),
    )
}

/// Checks the stored table, or a candidate table passed as `schemes[]`.
fn handle_schemes_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let rows = if req.params.get("schemes").is_some() {
        match parse_rows(req) {
            Ok(v) => v,
            Err(e) => return e,
        }
    } else {
        let conn = match db_conn(state, req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        match load_schemes(conn, req) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    let coverage = grading::validate_coverage(&rows);
    ok(
        &req.id,
        json!({
            "gaps": coverage.gaps,
            "overlaps": coverage.overlaps,
            "isComplete": coverage.is_complete()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schemes.list" => Some(handle_schemes_list(state, req)),
        "schemes.replace" => Some(handle_schemes_replace(state, req)),
        "schemes.validate" => Some(handle_schemes_validate(state, req)),
        _ => None,
    }
}
