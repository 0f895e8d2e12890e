//! Carbon-stock baseline from field inventory, satellite biomass, or a blend.
//!
//! Primary path: `carbon = AGB * 0.47`, `CO2e = carbon * 44/12`.
//! When the external computation fails, a local approximation is returned
//! instead with its own constants (0.50 and 3.67). The two sets stay
//! distinct; results from the local path carry `degraded = true`.

use crate::client::{BiomassRequest, GeospatialComputationClient};
use crate::config::CarbonConfig;
use crate::error::{BaselineError, BaselineResult};
use crate::invoker::CancelToken;
use crate::result_parser::{require_number, ResultParser};
use crate::types::{
    round_to, BoundaryPolygon, CarbonBaselineResult, Confidence, DateWindow, EstimationMethod,
    TreeMeasurement,
};
use chrono::{Datelike, NaiveDate, Utc};
use std::sync::Arc;

/// Carbon fraction of dry biomass.
pub const CARBON_FRACTION: f64 = 0.47;
/// Molecular-weight ratio of CO2 to carbon.
pub const CO2_PER_CARBON: f64 = 44.0 / 12.0;
pub const FALLBACK_CARBON_FRACTION: f64 = 0.50;
pub const FALLBACK_CO2_PER_CARBON: f64 = 3.67;

/// g/cm³, used when a species is not in the table.
pub const DEFAULT_WOOD_DENSITY: f64 = 0.60;

const WOOD_DENSITY: [(&str, f64); 13] = [
    ("Pinus caribaea", 0.51),
    ("Pinus patula", 0.45),
    ("Eucalyptus", 0.65),
    ("Eucalyptus grandis", 0.55),
    ("Acacia", 0.58),
    ("Acacia mangium", 0.52),
    ("Coffea arabica", 0.55),
    ("Coffea", 0.55),
    ("Inga", 0.52),
    ("Cordia alliodora", 0.44),
    ("Cedrela odorata", 0.42),
    ("Swietenia macrophylla", 0.54),
    ("Tectona grandis", 0.55),
];

pub const ALLOMETRIC_EQUATION: &str = "Chave et al. 2014 (pantropical)";
pub const SATELLITE_EQUATION: &str = "NDVI-biomass correlation (Sentinel-2)";
pub const HYBRID_EQUATION: &str =
    "Chave et al. 2014 (pantropical) blended with NDVI-biomass correlation";
pub const STANDARD_REFERENCE: &str = "Verra VM0042";

pub fn wood_density(species: &str) -> f64 {
    let species = species.trim();
    WOOD_DENSITY
        .iter()
        .find(|(name, _)| *name == species)
        .or_else(|| {
            WOOD_DENSITY
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(species))
        })
        .map_or(DEFAULT_WOOD_DENSITY, |(_, density)| *density)
}

/// `AGB_kg = 0.0673 * (density * DBH² * H)^0.976`
pub fn tree_agb_kg(density: f64, dbh_cm: f64, height_m: f64) -> f64 {
    0.0673 * (density * dbh_cm.powi(2) * height_m).powf(0.976)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InventoryTotals {
    pub total_agb_kg: f64,
    pub trees_analyzed: u32,
}

impl InventoryTotals {
    pub fn total_agb_tonnes(&self) -> f64 {
        self.total_agb_kg / 1000.0
    }
}

/// Sums AGB over an inventory. Rows with non-positive or non-finite
/// DBH/height are skipped.
pub fn inventory_agb(trees: &[TreeMeasurement]) -> InventoryTotals {
    trees
        .iter()
        .filter(|t| {
            t.diameter_at_breast_height_cm.is_finite()
                && t.height_m.is_finite()
                && t.diameter_at_breast_height_cm > 0.0
                && t.height_m > 0.0
        })
        .fold(
            InventoryTotals {
                total_agb_kg: 0.0,
                trees_analyzed: 0,
            },
            |acc, t| {
                let agb = tree_agb_kg(
                    wood_density(&t.species),
                    t.diameter_at_breast_height_cm,
                    t.height_m,
                );
                InventoryTotals {
                    total_agb_kg: acc.total_agb_kg + agb * f64::from(t.trees()),
                    trees_analyzed: acc.trees_analyzed.saturating_add(t.trees()),
                }
            },
        )
}

/// Inventory totals, or `None` when no row survives validation.
fn usable_inventory(trees: Option<&[TreeMeasurement]>) -> Option<InventoryTotals> {
    trees
        .map(inventory_agb)
        .filter(|totals| totals.trees_analyzed > 0)
}

/// Share of the field estimate in a hybrid blend.
pub fn hybrid_field_weight(trees_analyzed: u32) -> f64 {
    (0.3 + f64::from(trees_analyzed) / 100.0).min(0.7)
}

/// Satellite biomass window: 1 January of last year through `today`.
pub fn satellite_window(today: NaiveDate) -> DateWindow {
    let start = NaiveDate::from_ymd_opt(today.year() - 1, 1, 1).unwrap_or(today);
    DateWindow { start, end: today }
}

#[derive(Debug, Clone)]
struct BiomassEstimate {
    total_agb_tonnes: f64,
    method: EstimationMethod,
    confidence: Confidence,
    trees_analyzed: u32,
    equation: &'static str,
}

pub struct CarbonBaselineEstimator {
    client: Arc<dyn GeospatialComputationClient>,
    config: CarbonConfig,
}

impl CarbonBaselineEstimator {
    pub fn new(client: Arc<dyn GeospatialComputationClient>, config: CarbonConfig) -> Self {
        Self { client, config }
    }

    /// Never fails because the external computation failed: those failures
    /// yield [`local_approximation`](Self::local_approximation). Cancellation
    /// is still returned to the caller.
    pub async fn estimate(
        &self,
        polygon: &BoundaryPolygon,
        project_id: &str,
        method: EstimationMethod,
        trees: Option<&[TreeMeasurement]>,
        cancel: &CancelToken,
    ) -> BaselineResult<CarbonBaselineResult> {
        let trees = trees.filter(|t| !t.is_empty());
        let area_ha = polygon.area_hectares();
        tracing::info!(project_id, %method, area_ha, "calculating carbon baseline");

        let inventory = usable_inventory(trees);
        if trees.is_some() && inventory.is_none() {
            tracing::warn!(project_id, "tree inventory has no usable measurements; ignoring it");
        }

        match self.primary(polygon, project_id, method, inventory, cancel).await {
            Ok(estimate) => {
                let result = self.from_biomass(estimate, area_ha);
                tracing::info!(
                    project_id,
                    methodology = %result.methodology,
                    confidence = ?result.confidence,
                    baseline_tco2e = result.baseline_carbon_tco2e,
                    "carbon baseline calculated"
                );
                Ok(result)
            }
            Err(err) if err.is_computation_failure() => {
                let result = self.local_approximation(area_ha, trees);
                tracing::warn!(
                    project_id,
                    degraded = true,
                    code = err.code(),
                    error = %err,
                    confidence = ?result.confidence,
                    baseline_tco2e = result.baseline_carbon_tco2e,
                    "carbon computation failed; returning degraded local estimate"
                );
                Ok(result)
            }
            Err(err) => Err(err),
        }
    }

    async fn primary(
        &self,
        polygon: &BoundaryPolygon,
        project_id: &str,
        method: EstimationMethod,
        inventory: Option<InventoryTotals>,
        cancel: &CancelToken,
    ) -> BaselineResult<BiomassEstimate> {
        match (method, inventory) {
            (EstimationMethod::Field, Some(totals)) => Ok(BiomassEstimate {
                total_agb_tonnes: totals.total_agb_tonnes(),
                method: EstimationMethod::Field,
                confidence: Confidence::High,
                trees_analyzed: totals.trees_analyzed,
                equation: ALLOMETRIC_EQUATION,
            }),
            (EstimationMethod::Hybrid, Some(totals)) => {
                let satellite = self.satellite_agb(polygon, project_id, cancel).await?;
                let weight = hybrid_field_weight(totals.trees_analyzed);
                tracing::debug!(
                    field_agb = totals.total_agb_tonnes(),
                    satellite_agb = satellite,
                    field_weight = weight,
                    "blending field and satellite biomass"
                );
                Ok(BiomassEstimate {
                    total_agb_tonnes: totals.total_agb_tonnes() * weight
                        + satellite * (1.0 - weight),
                    method: EstimationMethod::Hybrid,
                    confidence: Confidence::High,
                    trees_analyzed: totals.trees_analyzed,
                    equation: HYBRID_EQUATION,
                })
            }
            _ => Ok(BiomassEstimate {
                total_agb_tonnes: self.satellite_agb(polygon, project_id, cancel).await?,
                method: EstimationMethod::Satellite,
                confidence: Confidence::Medium,
                trees_analyzed: 0,
                equation: SATELLITE_EQUATION,
            }),
        }
    }

    async fn satellite_agb(
        &self,
        polygon: &BoundaryPolygon,
        project_id: &str,
        cancel: &CancelToken,
    ) -> BaselineResult<f64> {
        let request = BiomassRequest {
            polygon,
            window: satellite_window(Utc::now().date_naive()),
            project_id,
            method: EstimationMethod::Satellite,
            trees: None,
        };
        let object = self.client.biomass(&request, cancel).await?;
        ResultParser::validate_json_structure(&object, &["totalAgbTonnes"])?;

        let total = require_number(&object, "totalAgbTonnes")?;
        if !(total.is_finite() && total >= 0.0) {
            return Err(BaselineError::InvalidResultShape(format!(
                "totalAgbTonnes {} must be a non-negative number",
                total
            )));
        }
        Ok(total)
    }

    fn from_biomass(&self, estimate: BiomassEstimate, area_ha: f64) -> CarbonBaselineResult {
        let total_carbon = estimate.total_agb_tonnes * CARBON_FRACTION;
        let co2e = total_carbon * CO2_PER_CARBON;

        CarbonBaselineResult {
            baseline_carbon_tco2e: round_to(co2e, 2),
            agb_tonnes_per_ha: round_to(per_hectare(estimate.total_agb_tonnes, area_ha), 2),
            total_agb_tonnes: round_to(estimate.total_agb_tonnes, 2),
            total_carbon_tonnes: round_to(total_carbon, 2),
            area_ha: round_to(area_ha, 4),
            methodology: estimate.method,
            confidence: estimate.confidence,
            trees_analyzed: estimate.trees_analyzed,
            calculated_at: Utc::now(),
            equation: estimate.equation.to_string(),
            standard_reference: STANDARD_REFERENCE.to_string(),
            degraded: false,
        }
    }

    /// Pure local estimate: the allometric sum with the fallback constants
    /// when the inventory has usable trees, otherwise a flat per-hectare stock.
    pub fn local_approximation(
        &self,
        area_ha: f64,
        trees: Option<&[TreeMeasurement]>,
    ) -> CarbonBaselineResult {
        let (total_agb, total_carbon, co2e, method, confidence, trees_analyzed, equation) =
            match usable_inventory(trees) {
                Some(totals) => {
                    let agb = totals.total_agb_tonnes();
                    let carbon = agb * FALLBACK_CARBON_FRACTION;
                    (
                        agb,
                        carbon,
                        carbon * FALLBACK_CO2_PER_CARBON,
                        EstimationMethod::Field,
                        Confidence::Medium,
                        totals.trees_analyzed,
                        format!("{} (local approximation)", ALLOMETRIC_EQUATION),
                    )
                }
                None => {
                    let co2e = self.config.fallback_tco2e_per_ha * area_ha;
                    let carbon = co2e / FALLBACK_CO2_PER_CARBON;
                    (
                        carbon / FALLBACK_CARBON_FRACTION,
                        carbon,
                        co2e,
                        EstimationMethod::Satellite,
                        Confidence::Low,
                        0,
                        format!(
                            "Flat {} tCO2e/ha (local approximation)",
                            self.config.fallback_tco2e_per_ha
                        ),
                    )
                }
            };

        CarbonBaselineResult {
            baseline_carbon_tco2e: round_to(co2e, 2),
            agb_tonnes_per_ha: round_to(per_hectare(total_agb, area_ha), 2),
            total_agb_tonnes: round_to(total_agb, 2),
            total_carbon_tonnes: round_to(total_carbon, 2),
            area_ha: round_to(area_ha, 4),
            methodology: method,
            confidence,
            trees_analyzed,
            calculated_at: Utc::now(),
            equation,
            standard_reference: STANDARD_REFERENCE.to_string(),
            degraded: true,
        }
    }
}

fn per_hectare(total: f64, area_ha: f64) -> f64 {
    if area_ha > 0.0 {
        total / area_ha
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Pinus caribaea", 0.51)]
    #[case("pinus CARIBAEA", 0.51)]
    #[case("Tectona grandis", 0.55)]
    #[case("Quercus robur", DEFAULT_WOOD_DENSITY)]
    #[case("default", DEFAULT_WOOD_DENSITY)]
    fn density_lookup(#[case] species: &str, #[case] expected: f64) {
        assert_eq!(wood_density(species), expected);
    }

    #[test]
    fn allometric_single_tree() {
        let expected = 0.0673 * (0.51_f64 * 625.0 * 15.0).powf(0.976);
        assert!((tree_agb_kg(0.51, 25.0, 15.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn inventory_skips_invalid_rows_and_honours_counts() {
        let trees = vec![
            TreeMeasurement::new("Inga", 20.0, 10.0).with_count(3),
            TreeMeasurement::new("Inga", 0.0, 10.0),
            TreeMeasurement::new("Inga", 20.0, -1.0),
        ];
        let totals = inventory_agb(&trees);
        assert_eq!(totals.trees_analyzed, 3);
        let single = tree_agb_kg(0.52, 20.0, 10.0);
        assert!((totals.total_agb_kg - 3.0 * single).abs() < 1e-9);
    }

    #[test]
    fn inventory_with_no_valid_rows_is_unusable() {
        let invalid = vec![TreeMeasurement::new("Inga", 0.0, 10.0)];
        assert_eq!(usable_inventory(Some(invalid.as_slice())), None);
        assert_eq!(usable_inventory(None), None);

        let valid = vec![TreeMeasurement::new("Inga", 20.0, 10.0)];
        assert_eq!(usable_inventory(Some(valid.as_slice())).map(|t| t.trees_analyzed), Some(1));
    }

    #[rstest]
    #[case(0, 0.3)]
    #[case(10, 0.4)]
    #[case(40, 0.7)]
    #[case(500, 0.7)]
    fn hybrid_weights(#[case] trees: u32, #[case] expected: f64) {
        assert!((hybrid_field_weight(trees) - expected).abs() < 1e-12);
    }

    #[test]
    fn satellite_window_starts_last_january() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 20).unwrap();
        let window = satellite_window(today);
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(window.end, today);
    }

    #[test]
    fn co2_ratio_differs_from_fallback_factor() {
        assert!((CO2_PER_CARBON - FALLBACK_CO2_PER_CARBON).abs() > 1e-3);
        assert!((CARBON_FRACTION - FALLBACK_CARBON_FRACTION).abs() > 1e-3);
    }
}
