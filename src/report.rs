use crate::engine::FarmAnalysis;
use crate::error::BaselineResult;
use crate::farm::FarmRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default directory for per-farm reports.
pub const DEFAULT_OUTPUT_DIR: &str = "data/farms/output";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmInfo {
    pub name: String,
    pub farm_id: String,
    pub owner: Option<String>,
    pub location: Value,
}

/// Everything known about one analysed farm, as written to disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmReport {
    pub farm_info: FarmInfo,
    pub polygon: Value,
    pub metadata: Map<String, Value>,
    pub analysis: FarmAnalysis,
    pub generated_at: DateTime<Utc>,
}

impl FarmReport {
    pub fn new(farm: &FarmRecord, analysis: FarmAnalysis) -> Self {
        Self {
            farm_info: FarmInfo {
                name: farm.name.clone(),
                farm_id: farm.farm_id.clone(),
                owner: farm.owner.clone(),
                location: farm
                    .location
                    .clone()
                    .unwrap_or_else(|| Value::Object(Map::new())),
            },
            polygon: farm.boundary.to_geojson(),
            metadata: farm.metadata.clone(),
            analysis,
            generated_at: Utc::now(),
        }
    }
}

/// One line of the batch summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub filename: String,
    pub success: bool,
    pub error: Option<String>,
    pub name: Option<String>,
    pub farm_id: Option<String>,
    pub area_ha: Option<f64>,
    pub ndvi: Option<f64>,
    pub eudr_compliant: Option<bool>,
    pub deforestation_percent: Option<f64>,
    #[serde(rename = "carbonTCO2e")]
    pub carbon_tco2e: Option<f64>,
}

impl SummaryRow {
    /// A farm succeeds when every analysis that ran completed.
    pub fn from_report(filename: &str, farm: &FarmRecord, report: &FarmReport) -> Self {
        let analysis = &report.analysis;
        let failures = analysis.failures();
        let ndvi = analysis.ndvi.as_ref().and_then(|o| o.completed());
        let deforestation = analysis.deforestation.as_ref().and_then(|o| o.completed());
        let carbon = analysis.carbon.as_ref().and_then(|o| o.completed());

        Self {
            filename: filename.to_string(),
            success: failures.is_empty(),
            error: (!failures.is_empty()).then(|| {
                failures
                    .iter()
                    .map(|(name, f)| format!("{}: {}", name, f.code))
                    .collect::<Vec<_>>()
                    .join("; ")
            }),
            name: Some(farm.name.clone()),
            farm_id: Some(farm.farm_id.clone()),
            area_ha: Some(crate::types::round_to(farm.boundary.area_hectares(), 4)),
            ndvi: ndvi.map(|n| n.mean),
            eudr_compliant: deforestation.map(|d| d.compliant),
            deforestation_percent: deforestation.map(|d| d.deforestation_percent),
            carbon_tco2e: carbon.map(|c| c.baseline_carbon_tco2e),
        }
    }

    pub fn load_failure(filename: &str, message: String) -> Self {
        Self {
            filename: filename.to_string(),
            success: false,
            error: Some(message),
            ..Self::default()
        }
    }
}

pub struct ReportWriter;

impl ReportWriter {
    /// `<output_dir>/<stem>_analysis.json`
    pub fn report_path(output_dir: &Path, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "farm".to_string());
        output_dir.join(format!("{}_analysis.json", stem))
    }

    pub fn write_json<T: Serialize>(path: &Path, value: &T) -> BaselineResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(&mut file, value)?;
        file.flush()?;
        Ok(())
    }

    pub fn write_csv(path: &Path, rows: &[SummaryRow]) -> BaselineResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);

        writeln!(
            file,
            "filename,success,error,name,farmId,areaHa,ndvi,eudrCompliant,deforestationPercent,carbonTCO2e"
        )?;

        for row in rows {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{},{}",
                csv_field(&row.filename),
                row.success,
                csv_field(row.error.as_deref().unwrap_or("")),
                csv_field(row.name.as_deref().unwrap_or("")),
                csv_field(row.farm_id.as_deref().unwrap_or("")),
                opt(row.area_ha),
                opt(row.ndvi),
                opt(row.eudr_compliant),
                opt(row.deforestation_percent),
                opt(row.carbon_tco2e),
            )?;
        }

        file.flush()?;
        Ok(())
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Quotes fields containing separators, quotes or line breaks.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
