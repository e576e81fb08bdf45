use std::fs::{self, File};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use ndarray::{Array1, Array2};
use serde::Serialize;

use super::accumulator::ListResult;
use super::engine::{AggregateResult, RunSummary};
use super::stats::ApaMeasures;

pub fn create_output_file(outdir: &Utf8Path, file_name: &str) -> Result<csv::Writer<File>> {
    let output_path = outdir.join(file_name);
    let output_file = File::create(&output_path)
        .with_context(|| format!("Couldn't create output file: {}", output_path))?;

    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(output_file))
}

fn write_matrix(outdir: &Utf8Path, file_name: &str, matrix: &Array2<f64>) -> Result<()> {
    let mut writer = create_output_file(outdir, file_name)?;
    for row in matrix.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_vector(outdir: &Utf8Path, file_name: &str, vector: &Array1<f64>) -> Result<()> {
    let mut writer = create_output_file(outdir, file_name)?;
    for value in vector {
        writer.write_record([value.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct MeasureRecord<'a> {
    list: &'a str,
    resolution: u32,
    window: u32,
    loops: usize,
    peak2mean: f64,
    #[serde(rename = "peak2UL")]
    peak2ul: f64,
    #[serde(rename = "peak2UR")]
    peak2ur: f64,
    #[serde(rename = "peak2LL")]
    peak2ll: f64,
    #[serde(rename = "peak2LR")]
    peak2lr: f64,
    #[serde(rename = "ZscoreLL")]
    zscore_ll: f64,
}

impl<'a> MeasureRecord<'a> {
    pub fn new(list: &'a ListResult, resolution: u32, window: u32, measures: &ApaMeasures) -> Self {
        Self {
            list: &list.name,
            resolution,
            window,
            loops: list.loops,
            peak2mean: measures.peak2mean,
            peak2ul: measures.peak2ul,
            peak2ur: measures.peak2ur,
            peak2ll: measures.peak2ll,
            peak2lr: measures.peak2lr,
            zscore_ll: measures.zscore_ll,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryRecord {
    resolution: u32,
    window: u32,
    pairs_total: usize,
    pairs_accumulated: usize,
    pairs_missing: usize,
    pairs_failed: usize,
    pairs_without_loops: usize,
    loops_processed: usize,
    loops_total: usize,
}

impl SummaryRecord {
    pub fn new(resolution: u32, window: u32, summary: &RunSummary) -> Self {
        Self {
            resolution,
            window,
            pairs_total: summary.pairs_total,
            pairs_accumulated: summary.pairs_accumulated,
            pairs_missing: summary.pairs_missing,
            pairs_failed: summary.pairs_failed,
            pairs_without_loops: summary.pairs_without_loops,
            loops_processed: summary.loops_processed,
            loops_total: summary.loops_total,
        }
    }
}

/// Directory holding the files of one list at one resolution
pub fn list_dir(outdir: &Utf8Path, resolution: u32, list: &str) -> Utf8PathBuf {
    outdir.join(resolution.to_string()).join(list)
}

/// Write every list of `result` under `{outdir}/{resolution}/{list}/`
pub fn write_result(outdir: &Utf8Path, result: &AggregateResult, corner_width: usize) -> Result<()> {
    for list in &result.lists {
        let dir = list_dir(outdir, result.resolution, &list.name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {}", dir))?;

        write_matrix(&dir, "apa.txt", &list.matrix)?;
        if let Some(normalization) = &list.normalization {
            write_matrix(&dir, "aggregate_normalized_apa.txt", &normalization.corrected)?;
            write_vector(&dir, "row_marginals.txt", &normalization.rows)?;
            write_vector(&dir, "col_marginals.txt", &normalization.cols)?;
        }

        let measures = ApaMeasures::compute(&list.matrix, corner_width);
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(dir.join("measures.txt"))
            .with_context(|| format!("Couldn't create output file: {}", dir.join("measures.txt")))?;
        writer.serialize(MeasureRecord::new(list, result.resolution, result.window, &measures))?;
        writer.flush()?;

        info!(
            "{} at {} bp: {} loops, peak2LL {:.3}",
            list.name, result.resolution, list.loops, measures.peak2ll
        );
    }
    Ok(())
}

/// One row per resolution
pub fn write_summary(outdir: &Utf8Path, results: &[AggregateResult]) -> Result<()> {
    fs::create_dir_all(outdir)
        .with_context(|| format!("Failed to create output directory: {}", outdir))?;
    let path = outdir.join("summary.txt");
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&path)
        .with_context(|| format!("Couldn't create output file: {}", path))?;
    for result in results {
        writer.serialize(SummaryRecord::new(result.resolution, result.window, &result.summary))?;
    }
    writer.flush()?;
    Ok(())
}
