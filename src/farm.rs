//! Local farm files.
//!
//! Three layouts are accepted: a `FeatureCollection` (first feature wins), a
//! single `Feature`, or a plain object with a `polygon` member holding either
//! a geometry or a `Feature`. A `MultiPolygon` is reduced to its first
//! polygon.

use crate::error::{BaselineError, BaselineResult};
use crate::geometry::GeometryValidator;
use crate::types::{BoundaryPolygon, TreeMeasurement};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FarmRecord {
    pub name: String,
    pub farm_id: String,
    pub owner: Option<String>,
    pub boundary: BoundaryPolygon,
    pub location: Option<Value>,
    pub tree_inventory: Option<Vec<TreeMeasurement>>,
    pub metadata: Map<String, Value>,
    pub source: Option<PathBuf>,
}

impl FarmRecord {
    pub fn has_tree_inventory(&self) -> bool {
        self.tree_inventory.as_ref().is_some_and(|t| !t.is_empty())
    }
}

pub struct FarmLoader;

impl FarmLoader {
    pub fn load(path: &Path) -> BaselineResult<FarmRecord> {
        if !path.is_file() {
            return Err(BaselineError::FarmFile(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        let data: Value = serde_json::from_str(&text).map_err(|e| {
            BaselineError::FarmFile(format!("{} is not valid JSON: {}", path.display(), e))
        })?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "farm".to_string());

        let mut farm = Self::from_value(&data, &stem)?;
        farm.source = Some(path.to_path_buf());
        Ok(farm)
    }

    /// `stem` names the farm (and its generated id) when the document does not.
    pub fn from_value(data: &Value, stem: &str) -> BaselineResult<FarmRecord> {
        let root = data
            .as_object()
            .ok_or_else(|| BaselineError::FarmFile("farm file must hold a JSON object".into()))?;

        let (geometry, mut name, mut owner, metadata) =
            match root.get("type").and_then(Value::as_str) {
                Some("FeatureCollection") => {
                    let feature = root
                        .get("features")
                        .and_then(Value::as_array)
                        .and_then(|f| f.first())
                        .ok_or_else(|| {
                            BaselineError::FarmFile("FeatureCollection has no features".into())
                        })?;
                    Self::from_feature(feature, root)?
                }
                Some("Feature") => Self::from_feature(data, root)?,
                _ => match root.get("polygon") {
                    Some(polygon) => {
                        let geometry = if polygon.get("type").and_then(Value::as_str)
                            == Some("Feature")
                        {
                            feature_geometry(polygon)?
                        } else {
                            polygon
                        };
                        let metadata = match root.get("metadata") {
                            Some(Value::Object(map)) => map.clone(),
                            Some(Value::Null) | None => Map::new(),
                            Some(other) => wrap_value(other.clone()),
                        };
                        (geometry, None, None, metadata)
                    }
                    None => {
                        return Err(BaselineError::FarmFile(
                            "unsupported farm layout: expected a FeatureCollection, a Feature \
                             or an object with a 'polygon' member"
                                .into(),
                        ))
                    }
                },
            };

        let boundary = GeometryValidator::validate(&first_polygon(geometry)?)?;

        if name.is_none() {
            name = first_text(root, &["name", "Name"]);
        }
        if owner.is_none() {
            owner = first_text(root, &["owner", "Owner"]);
        }

        let farm_id = first_text(root, &["farmId", "projectId"])
            .unwrap_or_else(|| format!("farm-{}", stem.replace(' ', "-").to_lowercase()));

        let tree_inventory = match root.get("treeInventory") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<Vec<TreeMeasurement>>(value.clone()).map_err(|e| {
                    BaselineError::FarmFile(format!("treeInventory is malformed: {}", e))
                })?,
            ),
        };

        Ok(FarmRecord {
            name: name.unwrap_or_else(|| stem.to_string()),
            farm_id,
            owner,
            boundary,
            location: root.get("location").cloned(),
            tree_inventory,
            metadata,
            source: None,
        })
    }

    /// Geometry, name, owner and merged metadata of a GeoJSON feature.
    fn from_feature<'a>(
        feature: &'a Value,
        root: &Map<String, Value>,
    ) -> BaselineResult<(&'a Value, Option<String>, Option<String>, Map<String, Value>)> {
        let geometry = feature_geometry(feature)?;
        let props = feature
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let name = first_text(&props, &["name", "Name", "Description"]);
        let owner = first_text(&props, &["owner", "Owner"]);

        let mut metadata = props;
        if let Some(Value::Object(extra)) = root.get("metadata") {
            metadata.extend(extra.clone());
        }
        Ok((geometry, name, owner, metadata))
    }
}

fn feature_geometry(feature: &Value) -> BaselineResult<&Value> {
    feature
        .get("geometry")
        .filter(|g| g.is_object())
        .ok_or_else(|| BaselineError::FarmFile("feature has no geometry".into()))
}

/// `Polygon` passes through; `MultiPolygon` becomes its first polygon.
fn first_polygon(geometry: &Value) -> BaselineResult<Value> {
    match geometry.get("type").and_then(Value::as_str) {
        Some("MultiPolygon") => {
            let first = geometry
                .get("coordinates")
                .and_then(Value::as_array)
                .and_then(|polygons| polygons.first())
                .filter(|p| p.is_array())
                .ok_or_else(|| {
                    BaselineError::InvalidGeometry("MultiPolygon has no polygons".into())
                })?;
            Ok(serde_json::json!({ "type": "Polygon", "coordinates": first }))
        }
        _ => Ok(geometry.clone()),
    }
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn wrap_value(value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("value".to_string(), value);
    map
}
