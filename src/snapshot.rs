use crate::calc::{MarkRecord, StudentAggregate};
use crate::store::ExamInfo;
use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SNAPSHOT_DIR: &str = "snapshots";
const MANIFEST_ENTRY: &str = "manifest.json";
pub const BUNDLE_FORMAT_V1: &str = "results-snapshots-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub file_count: usize,
}

/// School codes, years and exam numbers are user text; keep them to one safe path
/// segment each.
fn path_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        "_".to_string()
    } else {
        cleaned
    }
}

pub fn snapshot_path(workspace: &Path, exam: &ExamInfo, student_id: &str) -> PathBuf {
    workspace
        .join(SNAPSHOT_DIR)
        .join(path_segment(&exam.school_code))
        .join(path_segment(&exam.academic_year))
        .join(path_segment(&exam.exam_number))
        .join(format!("{}.json", path_segment(student_id)))
}

/// Writes one student's marks and aggregate for one exam. Written to a
/// temp file first so readers never see a partial blob.
pub fn write_student_snapshot(
    workspace: &Path,
    exam: &ExamInfo,
    student_id: &str,
    marks: &[MarkRecord],
    aggregate: &StudentAggregate,
) -> anyhow::Result<PathBuf> {
    let path = snapshot_path(workspace, exam, student_id);
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("snapshot path has no parent"))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;

    let body = json!({
        "schoolCode": exam.school_code,
        "examId": exam.id,
        "examNumber": exam.exam_number,
        "academicYear": exam.academic_year,
        "studentId": student_id,
        "generatedAt": chrono::Utc::now().to_rfc3339(),
        "marks": marks,
        "aggregate": aggregate,
    });
    let tmp = path.with_extension("json.writing");
    std::fs::write(
        &tmp,
        serde_json::to_string_pretty(&body).context("failed to serialize snapshot")?,
    )
    .with_context(|| format!("failed to write {}", tmp.to_string_lossy()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("failed to move snapshot to {}", path.to_string_lossy()))?;
    Ok(path)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for ent in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.to_string_lossy()))?
    {
        let p = ent?.path();
        if p.is_dir() {
            collect_files(&p, out)?;
        } else if p.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(p);
        }
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Zips every snapshot under the workspace with a manifest of SHA-256
/// digests keyed by relative path.
pub fn export_snapshot_bundle(workspace: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let root = workspace.join(SNAPSHOT_DIR);
    let mut files: Vec<PathBuf> = Vec::new();
    if root.is_dir() {
        collect_files(&root, &mut files)?;
    }
    files.sort();

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut digests = serde_json::Map::new();
    for p in &files {
        let rel = p
            .strip_prefix(&root)
            .context("snapshot outside snapshot root")?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        let bytes =
            std::fs::read(p).with_context(|| format!("failed to read {}", p.to_string_lossy()))?;
        digests.insert(rel.clone(), json!(sha256_hex(&bytes)));
        zip.start_file(format!("{}/{}", SNAPSHOT_DIR, rel), opts)
            .with_context(|| format!("failed to start entry {}", rel))?;
        zip.write_all(&bytes)
            .with_context(|| format!("failed to write entry {}", rel))?;
    }

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "files": digests,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        file_count: files.len(),
    })
}
