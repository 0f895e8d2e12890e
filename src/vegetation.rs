use crate::client::{GeospatialComputationClient, VegetationRequest};
use crate::error::{BaselineError, BaselineResult};
use crate::invoker::CancelToken;
use crate::result_parser::{optional_number, optional_string, require_number, ResultParser};
use crate::types::{round_to, BoundaryPolygon, DateWindow, VegetationResult};
use chrono::Utc;
use std::sync::Arc;

const REQUIRED_FIELDS: [&str; 5] = ["mean", "median", "std", "min", "max"];

/// NDVI summary statistics. Every call runs the computation again; nothing
/// is cached.
pub struct VegetationAnalyzer {
    client: Arc<dyn GeospatialComputationClient>,
}

impl VegetationAnalyzer {
    pub fn new(client: Arc<dyn GeospatialComputationClient>) -> Self {
        Self { client }
    }

    pub async fn analyze(
        &self,
        polygon: &BoundaryPolygon,
        window: DateWindow,
        cancel: &CancelToken,
    ) -> BaselineResult<VegetationResult> {
        tracing::info!(start = %window.start, end = %window.end, "calculating NDVI");

        let request = VegetationRequest { polygon, window };
        let object = self.client.vegetation_index(&request, cancel).await?;

        ResultParser::validate_json_structure(&object, &REQUIRED_FIELDS).map_err(|err| {
            tracing::error!(error = %err, "NDVI result is incomplete");
            err
        })?;

        let stat = |field: &str| require_number(&object, field).map(|v| round_to(v, 4));
        let result = VegetationResult {
            mean: stat("mean")?,
            median: stat("median")?,
            std: stat("std")?,
            min: stat("min")?,
            max: stat("max")?,
            image_url: optional_string(&object, "imageUrl"),
            cloud_coverage: optional_number(&object, "cloudCoverage")?.map(|v| round_to(v, 2)),
            images_used: object.get("imagesUsed").and_then(|v| v.as_u64()),
            calculated_at: Utc::now(),
        };

        if result.min > result.max {
            return Err(BaselineError::InvalidResultShape(format!(
                "NDVI min {} exceeds max {}",
                result.min, result.max
            )));
        }

        tracing::info!(mean = result.mean, median = result.median, "NDVI calculated");
        Ok(result)
    }
}
