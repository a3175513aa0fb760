use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match config::load(conn) {
        Ok(cfg) => ok(&req.id, json!(cfg)),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.as_object() else {
        return err(&req.id, "bad_params", "params must be an object", None);
    };

    let mut cfg = match config::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = cfg.apply_patch(patch) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = config::save(conn, &cfg) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(?cfg, "engine config updated");
    ok(&req.id, json!(cfg))
}

fn handle_config_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = config::reset(conn) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!(config::EngineConfig::default()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(handle_config_get(state, req)),
        "config.update" => Some(handle_config_update(state, req)),
        "config.reset" => Some(handle_config_reset(state, req)),
        _ => None,
    }
}
