//! # Report Export
//!
//! Writes a finished [`CalibrationReport`] to disk:
//!
//! | File                      | Columns                                             |
//! |---------------------------|-----------------------------------------------------|
//! | `results.csv`             | magnitude, repeat_index, elapsed_seconds            |
//! | `curve_summary.csv`       | magnitude, count, mean, std, angular_rate           |
//! | `compensation_table.csv`  | point_index, forward_x, forward_y, inv_x, inv_y     |
//! | `calibration.json`        | the whole report                                    |
//!
//! Each run goes into its own `run_YYYYmmdd_HHMMSS` directory unless the
//! exporter is built with [`CsvExporter::flat`].

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use super::fitter::CalibrationReport;
use crate::error::{Result, StickcalError};

pub const RESULTS_FILE: &str = "results.csv";
pub const SUMMARY_FILE: &str = "curve_summary.csv";
pub const COMPENSATION_FILE: &str = "compensation_table.csv";
pub const REPORT_FILE: &str = "calibration.json";

/// Destination for finished calibration reports.
pub trait ExportSink: Send {
    /// Persist the report, returning the directory it was written to.
    fn export(&mut self, report: &CalibrationReport) -> Result<PathBuf>;
}

/// Writes the CSV tables and a JSON dump under a root directory.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    root: PathBuf,
    timestamped: bool,
}

impl CsvExporter {
    /// Export each run into a fresh timestamped directory under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timestamped: true,
        }
    }

    /// Export straight into `root`, overwriting previous files.
    pub fn flat(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timestamped: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self) -> PathBuf {
        if !self.timestamped {
            return self.root.clone();
        }
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let base = self.root.join(format!("run_{}", stamp));
        if !base.exists() {
            return base;
        }
        // Two runs finished within the same second.
        (1..)
            .map(|n| self.root.join(format!("run_{}_{}", stamp, n)))
            .find(|p| !p.exists())
            .unwrap_or(base)
    }
}

impl ExportSink for CsvExporter {
    fn export(&mut self, report: &CalibrationReport) -> Result<PathBuf> {
        let dir = self.run_dir();
        fs::create_dir_all(&dir).map_err(|e| {
            StickcalError::Export(format!("cannot create {}: {}", dir.display(), e))
        })?;

        write_results(&dir.join(RESULTS_FILE), report)?;
        write_summary(&dir.join(SUMMARY_FILE), report)?;
        write_compensation(&dir.join(COMPENSATION_FILE), report)?;

        let json = serde_json::to_string_pretty(report)?;
        fs::write(dir.join(REPORT_FILE), json)?;

        info!(
            "Exported {} samples and {} curve points to {}",
            report.samples.len(),
            report.fit.forward_points.len(),
            dir.display()
        );
        Ok(dir)
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| StickcalError::Export(format!("cannot write {}: {}", path.display(), e)))
}

fn write_results(path: &Path, report: &CalibrationReport) -> Result<()> {
    let mut out = create(path)?;
    writeln!(out, "magnitude,repeat_index,elapsed_seconds")?;
    for s in &report.samples {
        writeln!(out, "{},{},{}", s.magnitude, s.repeat_index, s.elapsed_seconds)?;
    }
    out.flush()?;
    Ok(())
}

fn write_summary(path: &Path, report: &CalibrationReport) -> Result<()> {
    let mut out = create(path)?;
    writeln!(out, "magnitude,count,mean,std,angular_rate")?;
    for s in &report.stats {
        let std = s.std.map(|v| v.to_string()).unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{}",
            s.magnitude, s.count, s.mean, std, s.angular_rate
        )?;
    }
    out.flush()?;
    Ok(())
}

fn write_compensation(path: &Path, report: &CalibrationReport) -> Result<()> {
    let mut out = create(path)?;
    writeln!(out, "point_index,forward_x,forward_y,inv_x,inv_y")?;
    for r in &report.fit.compensation_table {
        writeln!(
            out,
            "{},{},{},{},{}",
            r.point_index, r.forward_x, r.forward_y, r.inv_x, r.inv_y
        )?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::fitter::CurveFitter;
    use crate::calibration::{MeasurementSample, TestParams};
    use tempfile::TempDir;

    fn report() -> CalibrationReport {
        let params = TestParams::default();
        let samples = vec![
            MeasurementSample {
                magnitude: 0.5,
                repeat_index: 0,
                elapsed_seconds: 2.0,
            },
            MeasurementSample {
                magnitude: 0.5,
                repeat_index: 1,
                elapsed_seconds: 2.5,
            },
            MeasurementSample {
                magnitude: 1.0,
                repeat_index: 0,
                elapsed_seconds: 1.0,
            },
        ];
        CurveFitter::from_params(&params)
            .report(&params, samples, 0.1)
            .unwrap()
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_flat_export_writes_all_files() {
        let tmp = TempDir::new().unwrap();
        let mut exporter = CsvExporter::flat(tmp.path());

        let dir = exporter.export(&report()).unwrap();
        assert_eq!(dir, tmp.path());

        let results = lines(&dir.join(RESULTS_FILE));
        assert_eq!(results[0], "magnitude,repeat_index,elapsed_seconds");
        assert_eq!(results[1], "0.5,0,2");
        assert_eq!(results.len(), 4);

        let summary = lines(&dir.join(SUMMARY_FILE));
        assert_eq!(summary[0], "magnitude,count,mean,std,angular_rate");
        assert!(summary[1].starts_with("0.5,2,2.25,"));
        // A single sample has no standard deviation.
        let single: Vec<&str> = summary[2].split(',').collect();
        assert_eq!(single[..4], ["1", "1", "1", ""]);

        let table = lines(&dir.join(COMPENSATION_FILE));
        assert_eq!(table[0], "point_index,forward_x,forward_y,inv_x,inv_y");
        assert_eq!(table.len(), 1 + 3);
        assert!(table[1].starts_with("1,"));
    }

    #[test]
    fn test_json_report_parses_back() {
        let tmp = TempDir::new().unwrap();
        let dir = CsvExporter::flat(tmp.path()).export(&report()).unwrap();

        let text = fs::read_to_string(dir.join(REPORT_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["deadzone"], 0.1);
        assert_eq!(value["samples"].as_array().unwrap().len(), 3);
        assert_eq!(value["fit"]["inverse_points"].as_array().unwrap().len(), 3);
        assert_eq!(value["params"]["direction"], "right");
    }

    #[test]
    fn test_timestamped_runs_get_distinct_dirs() {
        let tmp = TempDir::new().unwrap();
        let mut exporter = CsvExporter::new(tmp.path());

        let first = exporter.export(&report()).unwrap();
        let second = exporter.export(&report()).unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with(tmp.path()));
        assert!(first.join(RESULTS_FILE).exists());
        assert!(second.join(COMPENSATION_FILE).exists());
    }

    #[test]
    fn test_unwritable_root_is_an_export_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        fs::write(&blocker, b"x").unwrap();

        let err = CsvExporter::new(&blocker).export(&report()).unwrap_err();
        assert!(matches!(err, StickcalError::Export(_)));
    }
}
