//! Export: warehouse tables to CSV, and the ranked consensus table.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use gridline_core::domain::{ConsensusRecord, RecordBatch, TemporalKey};
use gridline_core::store::{ReadFilter, TableRef, Warehouse};

use crate::pipeline::CONSENSUS_PROJECTIONS;

// ─── CSV export ─────────────────────────────────────────────────────

/// Render a batch as CSV: one column per declared column, plus `source`
/// provenance. Nulls are empty cells.
pub fn batch_to_csv(batch: &RecordBatch) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header: Vec<&str> = batch.columns.iter().map(String::as_str).collect();
    header.push("_source");
    wtr.write_record(&header)?;

    for record in batch.iter() {
        let mut row: Vec<String> = batch
            .columns
            .iter()
            .map(|c| {
                let value = record.get(c);
                if value.is_null() {
                    String::new()
                } else {
                    value.to_string()
                }
            })
            .collect();
        row.push(record.provenance.source.clone());
        wtr.write_record(&row)?;
    }

    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// Write a table (or a filtered slice of it) to `path`. Returns rows written.
pub fn export_table(
    store: &dyn Warehouse,
    table: &TableRef,
    filter: ReadFilter,
    path: &Path,
) -> Result<usize> {
    let batch = store
        .read(table, filter)
        .with_context(|| format!("failed to read {table}"))?;
    let csv = batch_to_csv(&batch)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(batch.len())
}

// ─── Consensus ranking ──────────────────────────────────────────────

/// The `limit` highest consensus projections for one week, best first.
/// Ties break on subject so the order is stable.
pub fn top_consensus(store: &dyn Warehouse, key: TemporalKey, limit: usize) -> Result<Vec<ConsensusRecord>> {
    let rows = store
        .read(&TableRef::gold(CONSENSUS_PROJECTIONS), ReadFilter::key(key))
        .with_context(|| format!("failed to read consensus for {key}"))?;
    let mut records: Vec<ConsensusRecord> = rows.iter().filter_map(ConsensusRecord::from_record).collect();
    records.sort_by(|a, b| {
        b.points_ppr
            .mean
            .total_cmp(&a.points_ppr.mean)
            .then_with(|| a.subject.cmp(&b.subject))
    });
    records.truncate(limit);
    Ok(records)
}

/// Fixed-width text table of ranked consensus projections.
pub fn format_consensus_table(records: &[ConsensusRecord]) -> String {
    let mut out = format!(
        "{:>4}  {:<24} {:<4} {:<4} {:>7} {:>6} {:>7} {:>7} {:>4}  {}\n",
        "rank", "player", "pos", "team", "ppr", "sd", "floor", "ceil", "src", "conf"
    );
    for (i, r) in records.iter().enumerate() {
        let sd = r
            .points_ppr
            .std_dev
            .map_or_else(|| "-".to_string(), |sd| format!("{sd:.2}"));
        out.push_str(&format!(
            "{:>4}  {:<24} {:<4} {:<4} {:>7.2} {:>6} {:>7.2} {:>7.2} {:>4}  {}\n",
            i + 1,
            r.subject.as_str(),
            r.position.as_deref().unwrap_or("-"),
            r.team.as_deref().unwrap_or("-"),
            r.points_ppr.mean,
            sd,
            r.floor(),
            r.ceiling(),
            r.source_count,
            r.confidence,
        ));
    }
    out
}
