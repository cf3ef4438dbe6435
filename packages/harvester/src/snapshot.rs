//! JSON snapshot files of harvested records.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::config::format_api_date;
use crate::error::Result;
use crate::types::{QuerySpec, Record};

/// On-disk layout of a snapshot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<'a> {
    endpoint: &'a str,
    data_inicial: String,
    data_final: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    codigo_modalidade_contratacao: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cnpj_orgao: Option<&'a str>,
    harvested_at: String,
    total_records: usize,
    records: &'a [Record],
}

/// Default file name for a snapshot of `spec`.
///
/// e.g. `contratacoes_publicacao_20250108_20250108_mod8.json`
#[must_use]
pub fn snapshot_file_name(spec: &QuerySpec) -> String {
    let mut name = format!(
        "{}_{}_{}",
        spec.endpoint.path.replace('/', "_"),
        format_api_date(spec.start),
        format_api_date(spec.end)
    );
    if let Some(category) = spec.category {
        name.push_str(&format!("_mod{category}"));
    }
    if let Some(cnpj) = &spec.agency_cnpj {
        name.push('_');
        name.push_str(cnpj);
    }
    name.push_str(".json");
    name
}

/// Write `records` harvested for `spec` to a pretty-printed JSON file.
///
/// `output` may be a directory (the default file name is used inside it) or
/// a file path. Missing parent directories are created.
///
/// # Returns
/// The path of the written file.
pub fn save_snapshot(records: &[Record], spec: &QuerySpec, output: Option<&Path>) -> Result<PathBuf> {
    let path = match output {
        Some(path) if path.is_dir() => path.join(snapshot_file_name(spec)),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(snapshot_file_name(spec)),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let snapshot = Snapshot {
        endpoint: &spec.endpoint.path,
        data_inicial: format_api_date(spec.start),
        data_final: format_api_date(spec.end),
        codigo_modalidade_contratacao: spec.category,
        cnpj_orgao: spec.agency_cnpj.as_deref(),
        harvested_at: Utc::now().to_rfc3339(),
        total_records: records.len(),
        records,
    };

    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, &snapshot)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    tracing::debug!(path = %path.display(), records = records.len(), "Wrote snapshot");
    Ok(path)
}
