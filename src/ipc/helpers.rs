use crate::grading::GradingScheme;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ExamInfo, MarkFilter, StoreError};
use rusqlite::Connection;
use serde_json::json;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn store_err(req: &Request, e: StoreError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

pub fn load_schemes(conn: &Connection, req: &Request) -> Result<Vec<GradingScheme>, serde_json::Value> {
    store::list_schemes(conn).map_err(|e| store_err(req, e))
}

/// Aggregation scope. Every report names its academic year explicitly,
/// either through the exam or as a parameter.
#[derive(Debug, Clone)]
pub enum Scope {
    Exam(ExamInfo),
    Year {
        school_id: String,
        academic_year: String,
    },
}

impl Scope {
    pub fn filter(&self) -> MarkFilter {
        match self {
            Scope::Exam(exam) => MarkFilter {
                exam_id: Some(exam.id.clone()),
                school_id: Some(exam.school_id.clone()),
                ..MarkFilter::default()
            },
            Scope::Year {
                school_id,
                academic_year,
            } => MarkFilter {
                school_id: Some(school_id.clone()),
                academic_year: Some(academic_year.clone()),
                ..MarkFilter::default()
            },
        }
    }

    pub fn school_id(&self) -> &str {
        match self {
            Scope::Exam(exam) => &exam.school_id,
            Scope::Year { school_id, .. } => school_id,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scope::Exam(exam) => json!({
                "kind": "exam",
                "exam": exam,
                "academicYear": exam.academic_year,
                "schoolId": exam.school_id,
            }),
            Scope::Year {
                school_id,
                academic_year,
            } => json!({
                "kind": "year",
                "academicYear": academic_year,
                "schoolId": school_id,
            }),
        }
    }
}

/// `examId` selects one exam; otherwise `schoolId` + `academicYear` select
/// every exam of that year.
pub fn parse_scope(conn: &Connection, req: &Request) -> Result<Scope, serde_json::Value> {
    if let Some(exam_id) = optional_str(req, "examId") {
        let exam = store::exam_info(conn, &exam_id).map_err(|e| store_err(req, e))?;
        return Ok(Scope::Exam(exam));
    }
    let (Some(school_id), Some(academic_year)) =
        (optional_str(req, "schoolId"), optional_str(req, "academicYear"))
    else {
        return Err(err(
            &req.id,
            "bad_params",
            "provide examId, or schoolId and academicYear",
            None,
        ));
    };
    Ok(Scope::Year {
        school_id,
        academic_year,
    })
}

/// Scope filter narrowed by the optional `classLevel` parameter.
pub fn scoped_filter(scope: &Scope, req: &Request) -> MarkFilter {
    MarkFilter {
        class_level: optional_str(req, "classLevel"),
        ..scope.filter()
    }
}
