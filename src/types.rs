use chrono::{DateTime, NaiveDate, Utc};
use geo::GeodesicArea;
use geo_types::Polygon;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

/// External computation kinds, each with its own script and time bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationKind {
    Vegetation,
    Deforestation,
    CarbonBaseline,
}

impl ComputationKind {
    pub fn script_name(&self) -> &'static str {
        match self {
            Self::Vegetation => "ndvi_calculator.py",
            Self::Deforestation => "deforestation_analysis.py",
            Self::CarbonBaseline => "carbon_baseline.py",
        }
    }
}

impl fmt::Display for ComputationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vegetation => "vegetation index",
            Self::Deforestation => "deforestation",
            Self::CarbonBaseline => "carbon baseline",
        };
        f.write_str(name)
    }
}

/// A validated farm boundary. Only [`crate::geometry::GeometryValidator`]
/// constructs one, so holding a value means the ring checks passed.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryPolygon {
    polygon: Polygon<f64>,
}

impl BoundaryPolygon {
    pub(crate) fn from_validated(polygon: Polygon<f64>) -> Self {
        Self { polygon }
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    /// Geodesic area on the WGS84 ellipsoid, in hectares.
    pub fn area_hectares(&self) -> f64 {
        self.polygon.geodesic_area_unsigned() / SQUARE_METERS_PER_HECTARE
    }

    /// GeoJSON `Polygon` geometry handed to the external computation.
    pub fn to_geojson(&self) -> Value {
        let ring = |line: &geo_types::LineString<f64>| -> Vec<[f64; 2]> {
            line.coords().map(|c| [c.x, c.y]).collect()
        };
        let mut rings = vec![ring(self.polygon.exterior())];
        rings.extend(self.polygon.interiors().iter().map(ring));
        json!({ "type": "Polygon", "coordinates": rings })
    }
}

/// Calendar-date window with `start <= end <= today`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VegetationResult {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_coverage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_used: Option<u64>,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalImage {
    pub year: i32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedPeriod {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeforestationResult {
    pub deforestation_percent: f64,
    pub area_lost_ha: f64,
    pub initial_forest_ha: f64,
    pub compliant: bool,
    pub historical_images: Vec<HistoricalImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_detection_url: Option<String>,
    pub analyzed_period: AnalyzedPeriod,
    pub analysis_date: DateTime<Utc>,
    pub methodology: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl DeforestationResult {
    /// The verdict implied by the loss percentage alone.
    pub fn derived_compliance(&self, max_loss_percent: f64) -> bool {
        self.deforestation_percent < max_loss_percent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationMethod {
    Satellite,
    Field,
    Hybrid,
}

impl EstimationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Satellite => "satellite",
            Self::Field => "field",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EstimationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "satellite" => Ok(Self::Satellite),
            "field" => Ok(Self::Field),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!(
                "unknown estimation method '{}' (expected satellite, field or hybrid)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarbonBaselineResult {
    #[serde(rename = "baselineCarbonTCO2e")]
    pub baseline_carbon_tco2e: f64,
    pub agb_tonnes_per_ha: f64,
    pub total_agb_tonnes: f64,
    pub total_carbon_tonnes: f64,
    pub area_ha: f64,
    pub methodology: EstimationMethod,
    pub confidence: Confidence,
    pub trees_analyzed: u32,
    pub calculated_at: DateTime<Utc>,
    pub equation: String,
    pub standard_reference: String,
    /// Set when the request-level local approximation replaced the
    /// external computation.
    #[serde(default)]
    pub degraded: bool,
}

/// One row of a field inventory. `count` multiplies the measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeMeasurement {
    #[serde(default = "default_species")]
    pub species: String,
    #[serde(alias = "dbh_cm", alias = "dbhCm", alias = "avgDbh")]
    pub diameter_at_breast_height_cm: f64,
    #[serde(alias = "height_m", alias = "avgHeight")]
    pub height_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

fn default_species() -> String {
    "default".to_string()
}

impl TreeMeasurement {
    pub fn new(species: impl Into<String>, dbh_cm: f64, height_m: f64) -> Self {
        Self {
            species: species.into(),
            diameter_at_breast_height_cm: dbh_cm,
            height_m,
            count: None,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn trees(&self) -> u32 {
        self.count.unwrap_or(1)
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
