use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const CLASS_DATA_ENTRY: &str = "class-data.json";
const SUBMISSIONS_ENTRY: &str = "submissions.csv";
pub const BUNDLE_FORMAT_V1: &str = "classtrack-class-data-v1";

/// One (student, subject) line of the submission matrix.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixRow {
    pub roll_no: String,
    pub student_name: String,
    pub batch: String,
    pub defaulter: bool,
    pub subject_code: String,
    pub subject_name: String,
    pub subject_type: String,
    pub ta: String,
    pub cie: String,
    pub defaulter_work: String,
    pub submission_percentage: u32,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub matrix_rows: usize,
}

pub fn export_class_bundle(
    out_path: &Path,
    class_id: &str,
    class_data: &serde_json::Value,
    matrix: &[MatrixRow],
) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let csv_bytes = matrix_csv(matrix)?;

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "classId": class_id,
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "matrixRows": matrix.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(CLASS_DATA_ENTRY, opts)
        .context("failed to start class data entry")?;
    zip.write_all(
        serde_json::to_string_pretty(class_data)
            .context("failed to serialize class data")?
            .as_bytes(),
    )
    .context("failed to write class data entry")?;

    zip.start_file(SUBMISSIONS_ENTRY, opts)
        .context("failed to start submissions entry")?;
    zip.write_all(&csv_bytes)
        .context("failed to write submissions entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
        matrix_rows: matrix.len(),
    })
}

fn matrix_csv(matrix: &[MatrixRow]) -> anyhow::Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in matrix {
        wtr.serialize(row).context("failed to write submissions row")?;
    }
    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush submissions csv: {}", e))
}
