//! Five-year forest-loss analysis and the EUDR compliance verdict.

use crate::client::{ForestChangeRequest, GeospatialComputationClient};
use crate::config::ComplianceConfig;
use crate::error::{BaselineError, BaselineResult};
use crate::invoker::CancelToken;
use crate::result_parser::{optional_string, require_number, ResultParser};
use crate::temporal::TemporalRangeValidator;
use crate::types::{
    round_to, AnalyzedPeriod, BoundaryPolygon, DateWindow, DeforestationResult, HistoricalImage,
};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_METHODOLOGY: &str = "Hansen GFC + Sentinel-2 validation";

const REQUIRED_FIELDS: [&str; 3] = ["deforestationPercent", "areaLostHa", "initialForestHa"];

pub struct DeforestationAnalyzer {
    client: Arc<dyn GeospatialComputationClient>,
    compliance: ComplianceConfig,
}

impl DeforestationAnalyzer {
    pub fn new(client: Arc<dyn GeospatialComputationClient>, compliance: ComplianceConfig) -> Self {
        Self { client, compliance }
    }

    pub fn compliance(&self) -> &ComplianceConfig {
        &self.compliance
    }

    /// The regulatory window ending on `today`. Not caller-supplied.
    pub fn analysis_window(&self, today: NaiveDate) -> DateWindow {
        TemporalRangeValidator::trailing_years(self.compliance.lookback_years, today)
    }

    pub fn is_compliant(&self, deforestation_percent: f64) -> bool {
        deforestation_percent < self.compliance.max_loss_percent
    }

    pub async fn analyze(
        &self,
        polygon: &BoundaryPolygon,
        project_id: &str,
        cancel: &CancelToken,
    ) -> BaselineResult<DeforestationResult> {
        let window = self.analysis_window(Utc::now().date_naive());
        tracing::info!(
            project_id,
            start = %window.start,
            end = %window.end,
            "analyzing deforestation"
        );

        let request = ForestChangeRequest {
            polygon,
            window,
            project_id,
        };
        let object = self.client.forest_change(&request, cancel).await?;

        ResultParser::validate_json_structure(&object, &REQUIRED_FIELDS).map_err(
            |err| {
                tracing::error!(project_id, error = %err, "deforestation result is incomplete");
                err
            },
        )?;

        let deforestation_percent = require_number(&object, "deforestationPercent")?;
        if !(0.0..=100.0).contains(&deforestation_percent) {
            return Err(BaselineError::InvalidResultShape(format!(
                "deforestationPercent {} is outside [0, 100]",
                deforestation_percent
            )));
        }

        // The verdict must agree with the percentage callers see.
        let deforestation_percent = round_to(deforestation_percent, 2);
        let derived = self.is_compliant(deforestation_percent);
        let compliant = match object.get("compliant") {
            None | Some(Value::Null) => derived,
            Some(Value::Bool(upstream)) => {
                if *upstream != derived {
                    tracing::warn!(
                        project_id,
                        deforestation_percent,
                        upstream = *upstream,
                        threshold = self.compliance.max_loss_percent,
                        "upstream compliance verdict disagrees with threshold; keeping upstream"
                    );
                }
                *upstream
            }
            Some(_) => {
                return Err(BaselineError::InvalidResultShape(
                    "'compliant' must be a boolean".to_string(),
                ))
            }
        };

        let warning = optional_string(&object, "warning");
        if let Some(warning) = &warning {
            tracing::warn!(project_id, %warning, "deforestation computation reported a warning");
        }

        let result = DeforestationResult {
            deforestation_percent,
            area_lost_ha: round_to(require_number(&object, "areaLostHa")?, 2),
            initial_forest_ha: round_to(require_number(&object, "initialForestHa")?, 2),
            compliant,
            historical_images: parse_historical_images(object.get("historicalImages"))?,
            change_detection_url: optional_string(&object, "changeDetectionUrl"),
            analyzed_period: AnalyzedPeriod {
                start_date: window.start_str(),
                end_date: window.end_str(),
            },
            analysis_date: Utc::now(),
            methodology: optional_string(&object, "methodology")
                .unwrap_or_else(|| DEFAULT_METHODOLOGY.to_string()),
            warning,
        };

        tracing::info!(
            project_id,
            deforestation_percent = result.deforestation_percent,
            compliant = result.compliant,
            "deforestation analyzed"
        );
        Ok(result)
    }
}

fn parse_historical_images(value: Option<&Value>) -> BaselineResult<Vec<HistoricalImage>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            BaselineError::InvalidResultShape(format!("historicalImages: {}", e))
        }),
    }
}
