//! Directory-wide analysis with bounded concurrency.

use crate::engine::{AnalysisOptions, BaselineEngine};
use crate::error::{BaselineError, BaselineResult};
use crate::farm::{FarmLoader, FarmRecord};
use crate::invoker::CancelToken;
use crate::report::{FarmReport, ReportWriter, SummaryRow};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const FARM_EXTENSIONS: [&str; 2] = ["json", "geojson"];

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub analysis: AnalysisOptions,
    pub output_dir: PathBuf,
    /// Stop scheduling new farms after the first failure when false.
    pub continue_on_error: bool,
    pub concurrency: usize,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Files found but never analysed because the run stopped early.
    pub skipped: usize,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<SummaryRow>,
}

impl BatchSummary {
    fn from_rows(rows: Vec<SummaryRow>, total: usize) -> Self {
        let succeeded = rows.iter().filter(|r| r.success).count();
        Self {
            processed: rows.len(),
            succeeded,
            failed: rows.len() - succeeded,
            skipped: total.saturating_sub(rows.len()),
            generated_at: Utc::now(),
            results: rows,
        }
    }

    pub fn write(&self, json_path: Option<&Path>, csv_path: Option<&Path>) -> BaselineResult<()> {
        if let Some(path) = json_path {
            ReportWriter::write_json(path, self)?;
            tracing::info!(path = %path.display(), "summary JSON written");
        }
        if let Some(path) = csv_path {
            ReportWriter::write_csv(path, &self.results)?;
            tracing::info!(path = %path.display(), "summary CSV written");
        }
        Ok(())
    }
}

pub struct BatchProcessor<'a> {
    engine: &'a BaselineEngine,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(engine: &'a BaselineEngine) -> Self {
        Self { engine }
    }

    /// `*.json` and `*.geojson` files directly under `dir`, sorted by path.
    pub fn find_farm_files(dir: &Path) -> BaselineResult<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(BaselineError::FarmFile(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_farm = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| {
                    FARM_EXTENSIONS
                        .iter()
                        .any(|known| known.eq_ignore_ascii_case(ext))
                });
            if path.is_file() && is_farm {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parses every file in parallel. Order follows `files`.
    pub fn load_all(files: &[PathBuf]) -> Vec<(PathBuf, BaselineResult<FarmRecord>)> {
        files
            .par_iter()
            .map(|path| (path.clone(), FarmLoader::load(path)))
            .collect()
    }

    pub async fn run(
        &self,
        dir: &Path,
        options: &BatchOptions,
        cancel: &CancelToken,
    ) -> BaselineResult<BatchSummary> {
        let files = Self::find_farm_files(dir)?;
        if files.is_empty() {
            tracing::warn!(dir = %dir.display(), "no farm files found");
            return Ok(BatchSummary::from_rows(Vec::new(), 0));
        }
        tracing::info!(files = files.len(), dir = %dir.display(), "starting batch");

        let total = files.len();
        let loaded = Self::load_all(&files);

        let pb = if options.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style);
        }

        let engine = self.engine;
        let mut pending = stream::iter(loaded.into_iter().enumerate())
            .map(|(index, (path, farm))| async move {
                let row = Self::process_one(engine, &path, farm, options, cancel).await;
                (index, row)
            })
            .buffer_unordered(options.concurrency.max(1));

        let mut rows = Vec::with_capacity(total);
        while let Some((index, row)) = pending.next().await {
            pb.inc(1);
            pb.set_message(row.filename.clone());
            let failed = !row.success;
            rows.push((index, row));

            if failed && !options.continue_on_error {
                tracing::warn!("stopping batch after first failure");
                break;
            }
        }
        drop(pending);
        pb.finish_and_clear();

        rows.sort_by_key(|(index, _)| *index);
        let summary =
            BatchSummary::from_rows(rows.into_iter().map(|(_, row)| row).collect(), total);
        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "batch finished"
        );
        Ok(summary)
    }

    async fn process_one(
        engine: &BaselineEngine,
        path: &Path,
        farm: BaselineResult<FarmRecord>,
        options: &BatchOptions,
        cancel: &CancelToken,
    ) -> SummaryRow {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let farm = match farm {
            Ok(farm) => farm,
            Err(err) => {
                tracing::error!(file = %filename, error = %err, "could not load farm");
                return SummaryRow::load_failure(&filename, err.to_string());
            }
        };

        let analysis = engine.analyze_farm(&farm, &options.analysis, cancel).await;
        let report = FarmReport::new(&farm, analysis);
        let mut row = SummaryRow::from_report(&filename, &farm, &report);

        let report_path = ReportWriter::report_path(&options.output_dir, path);
        if let Err(err) = ReportWriter::write_json(&report_path, &report) {
            tracing::error!(file = %filename, error = %err, "could not write farm report");
            row.success = false;
            row.error = Some(err.to_string());
        }
        row
    }
}
