//! Entry point for collaborators: validates raw inputs, then dispatches to
//! the analyzers over one shared computation client.

use crate::carbon::CarbonBaselineEstimator;
use crate::client::{GeospatialComputationClient, ScriptComputationClient};
use crate::config::BaselineConfig;
use crate::deforestation::DeforestationAnalyzer;
use crate::error::{BaselineError, BaselineResult};
use crate::farm::FarmRecord;
use crate::geometry::GeometryValidator;
use crate::invoker::{CancelToken, ComputationInvoker};
use crate::temporal::TemporalRangeValidator;
use crate::types::{
    BoundaryPolygon, CarbonBaselineResult, DateWindow, DeforestationResult, EstimationMethod,
    TreeMeasurement, VegetationResult,
};
use crate::vegetation::VegetationAnalyzer;
use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

pub struct BaselineEngine {
    config: BaselineConfig,
    vegetation: VegetationAnalyzer,
    deforestation: DeforestationAnalyzer,
    carbon: CarbonBaselineEstimator,
}

impl BaselineEngine {
    pub fn new(client: Arc<dyn GeospatialComputationClient>, config: BaselineConfig) -> Self {
        Self {
            vegetation: VegetationAnalyzer::new(client.clone()),
            deforestation: DeforestationAnalyzer::new(client.clone(), config.compliance.clone()),
            carbon: CarbonBaselineEstimator::new(client, config.carbon.clone()),
            config,
        }
    }

    /// Engine backed by the script runner described by `config.computation`.
    pub fn from_config(config: BaselineConfig) -> Self {
        let invoker = ComputationInvoker::new(config.computation.clone());
        let client = Arc::new(ScriptComputationClient::new(invoker));
        Self::new(client, config)
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Resolves optional caller dates. Missing dates fall back to the
    /// trailing default window ending today (or ending at `end`).
    pub fn vegetation_window(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        today: NaiveDate,
    ) -> BaselineResult<DateWindow> {
        let max_years = self.config.dates.max_span_years;
        let days = Days::new(u64::from(self.config.dates.default_vegetation_window_days));

        match (start, end) {
            (Some(start), Some(end)) => {
                TemporalRangeValidator::validate_at(start, end, max_years, today)
            }
            (Some(start), None) => {
                let end = today.format("%Y-%m-%d").to_string();
                TemporalRangeValidator::validate_at(start, &end, max_years, today)
            }
            (None, end) => {
                let end = match end {
                    Some(end) => TemporalRangeValidator::parse_date(end)?,
                    None => today,
                };
                let start = end.checked_sub_days(days).unwrap_or(NaiveDate::MIN);
                TemporalRangeValidator::validate_at(
                    &start.format("%Y-%m-%d").to_string(),
                    &end.format("%Y-%m-%d").to_string(),
                    max_years,
                    today,
                )
            }
        }
    }

    pub async fn vegetation(
        &self,
        boundary: &Value,
        start: Option<&str>,
        end: Option<&str>,
        cancel: &CancelToken,
    ) -> BaselineResult<VegetationResult> {
        let polygon = GeometryValidator::validate(boundary)?;
        let window = self.vegetation_window(start, end, Utc::now().date_naive())?;
        self.vegetation.analyze(&polygon, window, cancel).await
    }

    pub async fn deforestation(
        &self,
        boundary: &Value,
        project_id: &str,
        cancel: &CancelToken,
    ) -> BaselineResult<DeforestationResult> {
        let polygon = GeometryValidator::validate(boundary)?;
        validate_project_id(project_id)?;
        self.deforestation.analyze(&polygon, project_id, cancel).await
    }

    pub async fn carbon_baseline(
        &self,
        boundary: &Value,
        project_id: &str,
        method: EstimationMethod,
        trees: Option<&[TreeMeasurement]>,
        cancel: &CancelToken,
    ) -> BaselineResult<CarbonBaselineResult> {
        let polygon = GeometryValidator::validate(boundary)?;
        validate_project_id(project_id)?;
        self.carbon
            .estimate(&polygon, project_id, method, trees, cancel)
            .await
    }

    /// Runs the selected analyses for one farm. A failing analysis is
    /// recorded in place and does not stop the others.
    pub async fn analyze_farm(
        &self,
        farm: &FarmRecord,
        options: &AnalysisOptions,
        cancel: &CancelToken,
    ) -> FarmAnalysis {
        tracing::info!(farm_id = %farm.farm_id, name = %farm.name, "analyzing farm");
        let polygon = &farm.boundary;
        let mut analysis = FarmAnalysis::default();

        if options.selection.includes_ndvi() {
            let result = self.farm_vegetation(polygon, options, cancel).await;
            analysis.ndvi = Some(AnalysisOutcome::record("ndvi", &farm.farm_id, result));
        }

        if options.selection.includes_deforestation() {
            let result = self
                .deforestation
                .analyze(polygon, &farm.farm_id, cancel)
                .await;
            analysis.deforestation =
                Some(AnalysisOutcome::record("deforestation", &farm.farm_id, result));
        }

        if options.selection.includes_carbon() {
            let method = options.method.unwrap_or(if farm.has_tree_inventory() {
                EstimationMethod::Field
            } else {
                EstimationMethod::Satellite
            });
            let result = self
                .carbon
                .estimate(
                    polygon,
                    &farm.farm_id,
                    method,
                    farm.tree_inventory.as_deref(),
                    cancel,
                )
                .await;
            analysis.carbon = Some(AnalysisOutcome::record("carbon", &farm.farm_id, result));
        }

        analysis
    }

    async fn farm_vegetation(
        &self,
        polygon: &BoundaryPolygon,
        options: &AnalysisOptions,
        cancel: &CancelToken,
    ) -> BaselineResult<VegetationResult> {
        let window = self.vegetation_window(
            options.start_date.as_deref(),
            options.end_date.as_deref(),
            Utc::now().date_naive(),
        )?;
        self.vegetation.analyze(polygon, window, cancel).await
    }
}

/// Project ids are passed to the computation as a required flag value.
fn validate_project_id(project_id: &str) -> BaselineResult<()> {
    if project_id.trim().is_empty() {
        return Err(BaselineError::InvalidProjectId(
            "project id must not be blank".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnalysisSelection {
    #[default]
    All,
    NdviOnly,
    DeforestationOnly,
    CarbonOnly,
}

impl AnalysisSelection {
    pub fn includes_ndvi(&self) -> bool {
        matches!(self, Self::All | Self::NdviOnly)
    }

    pub fn includes_deforestation(&self) -> bool {
        matches!(self, Self::All | Self::DeforestationOnly)
    }

    pub fn includes_carbon(&self) -> bool {
        matches!(self, Self::All | Self::CarbonOnly)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub selection: AnalysisSelection,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Carbon method; field when the farm has an inventory, else satellite.
    pub method: Option<EstimationMethod>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisFailure {
    pub code: String,
    pub message: String,
}

impl From<&BaselineError> for AnalysisFailure {
    fn from(err: &BaselineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisOutcome<T> {
    Completed(T),
    Failed { error: AnalysisFailure },
}

impl<T> AnalysisOutcome<T> {
    fn record(analysis: &str, farm_id: &str, result: BaselineResult<T>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(err) => {
                tracing::error!(farm_id, analysis, code = err.code(), error = %err, "analysis failed");
                Self::Failed {
                    error: AnalysisFailure::from(&err),
                }
            }
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&AnalysisFailure> {
        match self {
            Self::Completed(_) => None,
            Self::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FarmAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndvi: Option<AnalysisOutcome<VegetationResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deforestation: Option<AnalysisOutcome<DeforestationResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbon: Option<AnalysisOutcome<CarbonBaselineResult>>,
}

impl FarmAnalysis {
    pub fn failures(&self) -> Vec<(&'static str, &AnalysisFailure)> {
        [
            ("ndvi", self.ndvi.as_ref().and_then(AnalysisOutcome::failure)),
            (
                "deforestation",
                self.deforestation.as_ref().and_then(AnalysisOutcome::failure),
            ),
            ("carbon", self.carbon.as_ref().and_then(AnalysisOutcome::failure)),
        ]
        .into_iter()
        .filter_map(|(name, failure)| failure.map(|f| (name, f)))
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures().is_empty()
    }
}
