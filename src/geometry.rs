//! Boundary polygon validation.
//!
//! Accepts a GeoJSON `Polygon` or a `Feature` wrapping one. Positions may
//! carry a third (altitude) value, which is dropped. Self-intersection and
//! winding order are not checked.

use crate::error::{BaselineError, BaselineResult};
use crate::types::BoundaryPolygon;
use geo_types::{Coord, LineString, Polygon};
use serde_json::Value;

/// A closed ring needs at least four positions (first == last).
pub const MIN_RING_POINTS: usize = 4;

pub struct GeometryValidator;

impl GeometryValidator {
    pub fn validate(candidate: &Value) -> BaselineResult<BoundaryPolygon> {
        let geometry = Self::unwrap_feature(candidate)?;

        match geometry.get("type").and_then(Value::as_str) {
            Some("Polygon") => {}
            Some(other) => {
                return Err(invalid(format!("expected a Polygon geometry, got {}", other)))
            }
            None => return Err(invalid("geometry has no type")),
        }

        let rings = geometry
            .get("coordinates")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("Polygon coordinates must be an array of rings"))?;

        let exterior = rings
            .first()
            .ok_or_else(|| invalid("Polygon has no coordinate ring"))?;
        let exterior = Self::parse_ring(exterior, "exterior ring")?;

        let interiors = rings
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, ring)| Self::parse_ring(ring, &format!("interior ring {}", i)))
            .collect::<BaselineResult<Vec<_>>>()?;

        Ok(BoundaryPolygon::from_validated(Polygon::new(
            exterior, interiors,
        )))
    }

    fn unwrap_feature(candidate: &Value) -> BaselineResult<&Value> {
        if !candidate.is_object() {
            return Err(invalid("boundary must be a GeoJSON object"));
        }
        if candidate.get("type").and_then(Value::as_str) == Some("Feature") {
            return candidate
                .get("geometry")
                .filter(|g| g.is_object())
                .ok_or_else(|| invalid("Feature has no geometry"));
        }
        Ok(candidate)
    }

    fn parse_ring(ring: &Value, label: &str) -> BaselineResult<LineString<f64>> {
        let positions = ring
            .as_array()
            .ok_or_else(|| invalid(format!("{} must be an array of positions", label)))?;

        if positions.len() < MIN_RING_POINTS {
            return Err(invalid(format!(
                "{} has {} points, at least {} are required",
                label,
                positions.len(),
                MIN_RING_POINTS
            )));
        }

        let coords = positions
            .iter()
            .enumerate()
            .map(|(i, position)| Self::parse_position(position, label, i))
            .collect::<BaselineResult<Vec<_>>>()?;

        Ok(LineString::from(coords))
    }

    fn parse_position(position: &Value, label: &str, index: usize) -> BaselineResult<Coord<f64>> {
        let pair = position
            .as_array()
            .filter(|p| p.len() >= 2)
            .ok_or_else(|| {
                invalid(format!(
                    "{} position {} must be a [longitude, latitude] pair",
                    label, index
                ))
            })?;

        let number = |v: &Value| v.as_f64().filter(|n| n.is_finite());
        let (lon, lat) = match (number(&pair[0]), number(&pair[1])) {
            (Some(lon), Some(lat)) => (lon, lat),
            _ => {
                return Err(invalid(format!(
                    "{} position {} is not numeric",
                    label, index
                )))
            }
        };

        if !(-180.0..=180.0).contains(&lon) {
            return Err(invalid(format!(
                "{} position {} longitude {} is outside [-180, 180]",
                label, index, lon
            )));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(invalid(format!(
                "{} position {} latitude {} is outside [-90, 90]",
                label, index, lat
            )));
        }

        Ok(Coord { x: lon, y: lat })
    }
}

fn invalid(reason: impl Into<String>) -> BaselineError {
    BaselineError::InvalidGeometry(reason.into())
}
