//! Manual import of survey exports saved as CSV.
//!
//! Rows go through the same normalizer and dedup store as API responses, so
//! an import produces the same kind of collection a fetch does.

use crate::classifier::{fold, NEUTRAL_PRIORITY};
use crate::config::ImportConfig;
use crate::models::{RawResponse, ResponseRecord};
use crate::normalizer::{Normalizer, ResponseContext};
use crate::store::{DedupStore, MergePolicy};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Survey id given to imported rows.
pub const IMPORT_SURVEY_ID: &str = "import";

/// Result of importing one file.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub records: Vec<ResponseRecord>,
    pub rows: usize,
    pub duplicates: usize,
    /// Header of the grade column, `None` when grades were not imported.
    pub grade_column: Option<String>,
}

/// Resolved column positions.
#[derive(Debug, Default)]
struct Columns {
    grade: Option<usize>,
    protocol: Option<usize>,
    agent: Option<usize>,
    date: Option<usize>,
    comment: Option<usize>,
}

/// Import a CSV export.
pub fn import_csv(
    path: &Path,
    config: &ImportConfig,
    normalizer: &Normalizer,
    policy: MergePolicy,
) -> Result<ImportOutcome> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = decode(bytes);
    info!("Importing {}", path.display());
    import_text(&text, config, normalizer, policy)
}

/// Import CSV content already decoded to text.
pub fn import_text(
    text: &str,
    config: &ImportConfig,
    normalizer: &Normalizer,
    policy: MergePolicy,
) -> Result<ImportOutcome> {
    let text = text.trim_start_matches('\u{feff}');

    let mut reader = reader_for(text, b';');
    let mut headers = reader.headers().context("Failed to read CSV header")?.clone();
    if headers.len() <= 1 {
        debug!("Single column with ';', retrying with ','");
        reader = reader_for(text, b',');
        headers = reader.headers().context("Failed to read CSV header")?.clone();
    }

    let header_names: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
    let columns = resolve_columns(&header_names, config)?;

    let grade_column = columns.grade.map(|i| header_names[i].clone());
    let question_text = grade_column.clone().unwrap_or_default();
    let ctx = ResponseContext {
        account_id: &config.account_id,
        survey_id: IMPORT_SURVEY_ID,
        question_id: "",
        question_text: &question_text,
        service: None,
    };

    let cell = |row: &csv::StringRecord, column: Option<usize>| -> Value {
        column
            .and_then(|i| row.get(i))
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null)
    };

    let mut store = DedupStore::new(policy);
    let mut rows = 0;
    let mut duplicates = 0;

    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Malformed CSV row {}", line + 2))?;
        rows += 1;

        let raw = RawResponse {
            num_protocolo: cell(&row, columns.protocol),
            nom_agente: cell(&row, columns.agent),
            nom_valor: cell(&row, columns.grade),
            nom_resposta: cell(&row, columns.comment),
            dat_resposta: cell(&row, columns.date),
            nom_servico: Value::Null,
        };

        let mut record = normalizer.normalize(&raw, &ctx);
        if record.grade.is_none() {
            record.grade = Some(normalizer.grades().missing_sentinel);
        }

        if !store.insert(record, NEUTRAL_PRIORITY).is_admitted() {
            duplicates += 1;
        }
    }

    info!(
        "Imported {} rows into {} records ({} duplicates)",
        rows,
        store.len(),
        duplicates
    );

    Ok(ImportOutcome {
        records: store.drain(),
        rows,
        duplicates,
        grade_column,
    })
}

fn reader_for(text: &str, delimiter: u8) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes())
}

/// Decode file bytes as UTF-8, falling back to Latin-1.
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("File is not valid UTF-8, reading it as Latin-1");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    }
}

fn resolve_columns(headers: &[String], config: &ImportConfig) -> Result<Columns> {
    let folded: Vec<String> = headers.iter().map(|h| fold(h)).collect();

    let grade = if config.grade_column_keywords.is_empty() {
        None
    } else {
        let keywords: Vec<String> = config.grade_column_keywords.iter().map(|k| fold(k)).collect();
        match folded
            .iter()
            .position(|h| keywords.iter().all(|k| h.contains(k.as_str())))
        {
            Some(i) => Some(i),
            None => bail!(
                "No grade column matching [{}] found. Available columns: {}",
                config.grade_column_keywords.join(", "),
                headers.join(", ")
            ),
        }
    };

    let columns = Columns {
        grade,
        protocol: find_column(&folded, &config.protocol_columns),
        agent: find_column(&folded, &config.agent_columns),
        date: find_column(&folded, &config.date_columns),
        comment: find_column(&folded, &config.comment_columns),
    };
    debug!("Resolved import columns: {:?}", columns);
    Ok(columns)
}

/// Exact header match first, then the first header containing a candidate.
fn find_column(folded_headers: &[String], candidates: &[String]) -> Option<usize> {
    let candidates: Vec<String> = candidates.iter().map(|c| fold(c)).collect();
    folded_headers
        .iter()
        .position(|h| candidates.iter().any(|c| h == c))
        .or_else(|| {
            folded_headers
                .iter()
                .position(|h| candidates.iter().any(|c| !c.is_empty() && h.contains(c.as_str())))
        })
}
