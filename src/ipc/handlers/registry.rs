use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn id_or_new(req: &Request) -> String {
    optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn insert_err(req: &Request, table: &str, e: rusqlite::Error) -> serde_json::Value {
    err(
        &req.id,
        "db_insert_failed",
        e.to_string(),
        Some(json!({ "table": table })),
    )
}

fn require_school(conn: &Connection, req: &Request, school_id: &str) -> Result<(), serde_json::Value> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM schools WHERE id = ?", [school_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if found.is_none() {
        return Err(err(
            &req.id,
            "not_found",
            "school not found",
            Some(json!({ "schoolId": school_id })),
        ));
    }
    Ok(())
}

fn handle_schools_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = id_or_new(req);

    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, code, name) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET code = excluded.code, name = excluded.name",
        (&id, &code, &name),
    ) {
        return insert_err(req, "schools", e);
    }
    ok(&req.id, json!({ "schoolId": id }))
}

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, code, name FROM schools ORDER BY code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_years_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let is_current = req
        .params
        .get("isCurrent")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    // At most one year carries the flag.
    if is_current {
        if let Err(e) = tx.execute("UPDATE academic_years SET is_current = 0", []) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.execute(
        "INSERT INTO academic_years(name, is_current) VALUES(?, ?)
         ON CONFLICT(name) DO UPDATE SET is_current = excluded.is_current",
        (&name, is_current as i64),
    ) {
        return insert_err(req, "academic_years", e);
    }
    let stored: i64 = match tx.query_row(
        "SELECT is_current FROM academic_years WHERE name = ?",
        [&name],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "name": name, "isCurrent": stored != 0 }))
}

fn handle_years_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT name, is_current FROM academic_years ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "name": r.get::<_, String>(0)?,
                "isCurrent": r.get::<_, i64>(1)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(years) => ok(&req.id, json!({ "years": years })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// The flagged year, offered to callers as a default. Reports never read it.
fn handle_years_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let current: Result<Option<String>, _> = conn
        .query_row(
            "SELECT name FROM academic_years WHERE is_current = 1 ORDER BY name DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional();
    match current {
        Ok(name) => ok(&req.id, json!({ "academicYear": name })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_school(conn, req, &school_id) {
        return e;
    }
    let class_level = optional_str(req, "classLevel");
    let admission_no = optional_str(req, "admissionNo");
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let id = id_or_new(req);
    let now = chrono::Utc::now().to_rfc3339();

    if let Err(e) = conn.execute(
        "INSERT INTO students(id, school_id, class_level, last_name, first_name, admission_no, active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           school_id = excluded.school_id,
           class_level = excluded.class_level,
           last_name = excluded.last_name,
           first_name = excluded.first_name,
           admission_no = excluded.admission_no,
           active = excluded.active,
           updated_at = excluded.updated_at",
        (
            &id,
            &school_id,
            &class_level,
            &last_name,
            &first_name,
            &admission_no,
            active as i64,
            &now,
        ),
    ) {
        return insert_err(req, "students", e);
    }
    ok(&req.id, json!({ "studentId": id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_level = optional_str(req, "classLevel");

    let mut stmt = match conn.prepare(
        "SELECT id, class_level, last_name, first_name, admission_no, active
         FROM students
         WHERE school_id = ?1 AND (?2 IS NULL OR class_level = ?2)
         ORDER BY last_name, first_name, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&school_id, &class_level), |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classLevel": r.get::<_, Option<String>>(1)?,
                "displayName": format!("{}, {}", last, first),
                "lastName": last,
                "firstName": first,
                "admissionNo": r.get::<_, Option<String>>(4)?,
                "active": r.get::<_, i64>(5)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_school(conn, req, &school_id) {
        return e;
    }
    let id = id_or_new(req);

    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, school_id, code, name) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           school_id = excluded.school_id,
           code = excluded.code,
           name = excluded.name",
        (&id, &school_id, &code, &name),
    ) {
        return insert_err(req, "subjects", e);
    }
    ok(&req.id, json!({ "subjectId": id }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, code, name FROM subjects WHERE school_id = ? ORDER BY code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&school_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_exams_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let exam_number = match required_str(req, "examNumber") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = optional_str(req, "name").unwrap_or_else(|| exam_number.clone());
    let sort_order = req
        .params
        .get("sortOrder")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if let Err(e) = require_school(conn, req, &school_id) {
        return e;
    }
    let id = id_or_new(req);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO exams(id, school_id, academic_year, exam_number, name, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           school_id = excluded.school_id,
           academic_year = excluded.academic_year,
           exam_number = excluded.exam_number,
           name = excluded.name,
           sort_order = excluded.sort_order",
        (&id, &school_id, &academic_year, &exam_number, &name, sort_order),
    ) {
        return insert_err(req, "exams", e);
    }
    // Marks carry the exam's school and year for scoped queries; keep them in step.
    let moved = match tx.execute(
        "UPDATE marks SET school_id = ?, academic_year = ?
         WHERE exam_id = ? AND (school_id <> ? OR academic_year <> ?)",
        (&school_id, &academic_year, &id, &school_id, &academic_year),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    if moved > 0 {
        tracing::info!(exam_id = %id, marks = moved, "moved marks with edited exam");
    }
    ok(&req.id, json!({ "examId": id, "marksMoved": moved }))
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match store::list_exams(conn, &school_id, &academic_year) {
        Ok(exams) => ok(&req.id, json!({ "exams": exams })),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.upsert" => Some(handle_schools_upsert(state, req)),
        "schools.list" => Some(handle_schools_list(state, req)),
        "years.upsert" => Some(handle_years_upsert(state, req)),
        "years.list" => Some(handle_years_list(state, req)),
        "years.current" => Some(handle_years_current(state, req)),
        "students.upsert" => Some(handle_students_upsert(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "subjects.upsert" => Some(handle_subjects_upsert(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "exams.upsert" => Some(handle_exams_upsert(state, req)),
        "exams.list" => Some(handle_exams_list(state, req)),
        _ => None,
    }
}
