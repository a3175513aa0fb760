use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use crate::snapshot;
use serde_json::json;
use std::path::PathBuf;

fn handle_snapshots_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.as_deref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    match snapshot::export_snapshot_bundle(workspace, &out_path) {
        Ok(summary) => {
            tracing::info!(
                out = %out_path.to_string_lossy(),
                files = summary.file_count,
                "snapshot bundle exported"
            );
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "path": out_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "fileCount": summary.file_count
                }),
            )
        }
        Err(e) => err(
            &req.id,
            "export_failed",
            format!("{e:#}"),
            Some(json!({ "outPath": out_path.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "snapshots.export" => Some(handle_snapshots_export(state, req)),
        _ => None,
    }
}
