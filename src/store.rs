use crate::calc::MarkRecord;
use crate::grading::{resolve, sort_schemes, GradingScheme};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct StoreError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StoreError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::new("db_query_failed", e.to_string())
}

/// Scheme rows sorted ascending by `min_mark`, the only order resolution
/// is allowed to see.
pub fn list_schemes(conn: &Connection) -> Result<Vec<GradingScheme>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT grade, min_mark, max_mark, division, points
             FROM grading_schemes
             ORDER BY min_mark, rowid",
        )
        .map_err(query_err)?;
    let mut schemes = stmt
        .query_map([], |r| {
            Ok(GradingScheme {
                grade: r.get(0)?,
                min_mark: r.get(1)?,
                max_mark: r.get(2)?,
                division: r.get(3)?,
                points: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    sort_schemes(&mut schemes);
    Ok(schemes)
}

fn validate_scheme_row(i: usize, s: &GradingScheme) -> Result<(), StoreError> {
    if s.grade.trim().is_empty() {
        return Err(StoreError::new("bad_params", "grade must not be empty")
            .with_details(serde_json::json!({ "index": i })));
    }
    if !(0..=100).contains(&s.min_mark)
        || !(0..=100).contains(&s.max_mark)
        || s.min_mark > s.max_mark
    {
        return Err(StoreError::new(
            "bad_params",
            "mark range must satisfy 0 <= minMark <= maxMark <= 100",
        )
        .with_details(serde_json::json!({
            "index": i,
            "minMark": s.min_mark,
            "maxMark": s.max_mark
        })));
    }
    Ok(())
}

/// Replaces the whole scheme table. Rows are validated one by one; coverage
/// gaps and overlaps are allowed.
pub fn replace_schemes(conn: &Connection, rows: &[GradingScheme]) -> Result<usize, StoreError> {
    for (i, s) in rows.iter().enumerate() {
        validate_scheme_row(i, s)?;
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| StoreError::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM grading_schemes", [])
        .map_err(|e| StoreError::new("db_update_failed", e.to_string()))?;
    for s in rows {
        tx.execute(
            "INSERT INTO grading_schemes(id, grade, min_mark, max_mark, division, points)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                s.grade.trim(),
                s.min_mark,
                s.max_mark,
                s.division.as_deref().map(str::trim).filter(|d| !d.is_empty()),
                s.points,
            ),
        )
        .map_err(|e| {
            StoreError::new("db_insert_failed", e.to_string())
                .with_details(serde_json::json!({ "table": "grading_schemes" }))
        })?;
    }
    tx.commit()
        .map_err(|e| StoreError::new("db_commit_failed", e.to_string()))?;
    Ok(rows.len())
}

pub fn seed_schemes_if_empty(conn: &Connection, rows: &[GradingScheme]) -> Result<bool, StoreError> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM grading_schemes", [], |r| r.get(0))
        .map_err(query_err)?;
    if count > 0 {
        return Ok(false);
    }
    replace_schemes(conn, rows)?;
    Ok(true)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarkFilter {
    pub exam_id: Option<String>,
    pub exam_ids: Option<Vec<String>>,
    pub student_id: Option<String>,
    pub subject_id: Option<String>,
    pub school_id: Option<String>,
    pub academic_year: Option<String>,
    pub class_level: Option<String>,
}

pub fn parse_mark_filter(raw: Option<&serde_json::Value>) -> Result<MarkFilter, StoreError> {
    let Some(raw) = raw else {
        return Ok(MarkFilter::default());
    };
    if raw.is_null() {
        return Ok(MarkFilter::default());
    }
    if !raw.is_object() {
        return Err(StoreError::new("bad_params", "filter must be an object"));
    }
    serde_json::from_value(raw.clone())
        .map_err(|e| StoreError::new("bad_params", format!("invalid filter: {}", e)))
}

/// Marks matching `filter`, each carrying its student's class level.
/// Ordered by student, exam order, subject.
pub fn find_marks(conn: &Connection, filter: &MarkFilter) -> Result<Vec<MarkRecord>, StoreError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    let mut eq = |column: &str, v: &Option<String>| {
        if let Some(v) = v {
            clauses.push(format!("{} = ?", column));
            bind_values.push(Value::Text(v.clone()));
        }
    };
    eq("m.exam_id", &filter.exam_id);
    eq("m.student_id", &filter.student_id);
    eq("m.subject_id", &filter.subject_id);
    eq("m.school_id", &filter.school_id);
    eq("m.academic_year", &filter.academic_year);
    eq("s.class_level", &filter.class_level);

    if let Some(ids) = &filter.exam_ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat("?")
            .take(ids.len())
            .collect::<Vec<_>>()
            .join(",");
        clauses.push(format!("m.exam_id IN ({})", placeholders));
        for id in ids {
            bind_values.push(Value::Text(id.clone()));
        }
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT m.exam_id, m.student_id, m.subject_id, m.school_id, m.academic_year,
                m.raw_marks, m.standardized_marks, m.marks, m.grade, m.points, s.class_level
         FROM marks m
         LEFT JOIN students s ON s.id = m.student_id
         LEFT JOIN exams e ON e.id = m.exam_id
         {}
         ORDER BY m.student_id, COALESCE(e.sort_order, 0), m.exam_id, m.subject_id",
        where_sql
    );

    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            Ok(MarkRecord {
                exam_id: r.get(0)?,
                student_id: r.get(1)?,
                subject_id: r.get(2)?,
                school_id: r.get(3)?,
                academic_year: r.get(4)?,
                raw_marks: r.get(5)?,
                standardized_marks: r.get(6)?,
                marks: r.get(7)?,
                grade: r.get(8)?,
                points: r.get(9)?,
                class_level: r.get(10)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkKey {
    pub exam_id: String,
    pub student_id: String,
    pub subject_id: String,
    pub school_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamInfo {
    pub id: String,
    pub school_id: String,
    pub school_code: String,
    pub academic_year: String,
    pub exam_number: String,
    pub name: String,
    pub sort_order: i64,
}

pub fn exam_info(conn: &Connection, exam_id: &str) -> Result<ExamInfo, StoreError> {
    conn.query_row(
        "SELECT e.id, e.school_id, sc.code, e.academic_year, e.exam_number, e.name, e.sort_order
         FROM exams e
         JOIN schools sc ON sc.id = e.school_id
         WHERE e.id = ?",
        [exam_id],
        |r| {
            Ok(ExamInfo {
                id: r.get(0)?,
                school_id: r.get(1)?,
                school_code: r.get(2)?,
                academic_year: r.get(3)?,
                exam_number: r.get(4)?,
                name: r.get(5)?,
                sort_order: r.get(6)?,
            })
        },
    )
    .optional()
    .map_err(query_err)?
    .ok_or_else(|| {
        StoreError::new("not_found", "exam not found")
            .with_details(serde_json::json!({ "examId": exam_id }))
    })
}

/// Exams of one school and academic year in display order.
pub fn list_exams(
    conn: &Connection,
    school_id: &str,
    academic_year: &str,
) -> Result<Vec<ExamInfo>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.school_id, sc.code, e.academic_year, e.exam_number, e.name, e.sort_order
             FROM exams e
             JOIN schools sc ON sc.id = e.school_id
             WHERE e.school_id = ? AND e.academic_year = ?
             ORDER BY e.sort_order, e.exam_number",
        )
        .map_err(query_err)?;
    let exams = stmt
        .query_map((school_id, academic_year), |r| {
            Ok(ExamInfo {
                id: r.get(0)?,
                school_id: r.get(1)?,
                school_code: r.get(2)?,
                academic_year: r.get(3)?,
                exam_number: r.get(4)?,
                name: r.get(5)?,
                sort_order: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(exams)
}

fn check_student_school(conn: &Connection, key: &MarkKey) -> Result<(), StoreError> {
    let student_school: Option<String> = conn
        .query_row(
            "SELECT school_id FROM students WHERE id = ?",
            [&key.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    match student_school {
        None => Err(StoreError::new("not_found", "student not found")
            .with_details(serde_json::json!({ "studentId": key.student_id }))),
        Some(s) if s != key.school_id => Err(StoreError::new(
            "bad_params",
            "student does not belong to school",
        )
        .with_details(serde_json::json!({
            "studentId": key.student_id,
            "schoolId": key.school_id
        }))),
        Some(_) => Ok(()),
    }
}

fn check_subject(conn: &Connection, key: &MarkKey) -> Result<(), StoreError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM subjects WHERE id = ? AND school_id = ?",
            (&key.subject_id, &key.school_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    if found.is_none() {
        return Err(StoreError::new("not_found", "subject not found")
            .with_details(serde_json::json!({ "subjectId": key.subject_id })));
    }
    Ok(())
}

/// Create-or-update by composite key. Grade and points are recomputed from
/// `schemes`, `standardized_marks` mirrors `marks`, and `raw_marks` keeps the
/// first value ever stored (backfilled once if it was null).
pub fn upsert_mark(
    conn: &Connection,
    key: &MarkKey,
    marks: Option<i64>,
    schemes: &[GradingScheme],
) -> Result<MarkRecord, StoreError> {
    if let Some(m) = marks {
        if !(0..=100).contains(&m) {
            return Err(StoreError::new("bad_params", "marks must be between 0 and 100")
                .with_details(serde_json::json!({ "marks": m })));
        }
    }

    let exam = exam_info(conn, &key.exam_id)?;
    if exam.school_id != key.school_id {
        return Err(StoreError::new("bad_params", "exam does not belong to school")
            .with_details(serde_json::json!({
                "examId": key.exam_id,
                "schoolId": key.school_id
            })));
    }
    check_student_school(conn, key)?;
    check_subject(conn, key)?;

    let scheme = resolve(marks, schemes);
    let grade = scheme.map(|s| s.grade.clone());
    let points = scheme.and_then(|s| s.points);
    let updated_at = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO marks(id, exam_id, student_id, subject_id, school_id, academic_year,
                           raw_marks, standardized_marks, marks, grade, points, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_id, student_id, subject_id, school_id) DO UPDATE SET
           academic_year = excluded.academic_year,
           raw_marks = COALESCE(marks.raw_marks, excluded.raw_marks),
           standardized_marks = excluded.standardized_marks,
           marks = excluded.marks,
           grade = excluded.grade,
           points = excluded.points,
           updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            key.exam_id,
            key.student_id,
            key.subject_id,
            key.school_id,
            exam.academic_year,
            marks,
            marks,
            marks,
            grade,
            points,
            updated_at,
        ],
    )
    .map_err(|e| {
        StoreError::new("db_insert_failed", e.to_string())
            .with_details(serde_json::json!({ "table": "marks" }))
    })?;

    let filter = MarkFilter {
        exam_id: Some(key.exam_id.clone()),
        student_id: Some(key.student_id.clone()),
        subject_id: Some(key.subject_id.clone()),
        school_id: Some(key.school_id.clone()),
        ..MarkFilter::default()
    };
    find_marks(conn, &filter)?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::new("db_query_failed", "mark row missing after upsert"))
}

/// "Last, First" display names for every student of a school.
pub fn student_names(conn: &Connection, school_id: &str) -> Result<HashMap<String, String>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT id, last_name, first_name FROM students WHERE school_id = ?")
        .map_err(query_err)?;
    let names = stmt
        .query_map([school_id], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok((id, format!("{}, {}", last, first)))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(query_err)?;
    Ok(names)
}

/// Subject id -> (code, name) for one school.
pub fn subject_labels(
    conn: &Connection,
    school_id: &str,
) -> Result<HashMap<String, (String, String)>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT id, code, name FROM subjects WHERE school_id = ?")
        .map_err(query_err)?;
    let labels: HashMap<String, (String, String)> = stmt
        .query_map([school_id], |r| Ok((r.get(0)?, (r.get(1)?, r.get(2)?))))
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(query_err)?;
    Ok(labels)
}

/// School id -> (code, name) for every school.
pub fn school_labels(conn: &Connection) -> Result<HashMap<String, (String, String)>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT id, code, name FROM schools")
        .map_err(query_err)?;
    let labels: HashMap<String, (String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, (r.get(1)?, r.get(2)?))))
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(query_err)?;
    Ok(labels)
}
