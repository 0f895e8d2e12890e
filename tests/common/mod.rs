#![allow(dead_code)]

use async_trait::async_trait;
use farm_baseline::client::{
    BiomassRequest, ComputationObject, ForestChangeRequest, GeospatialComputationClient,
    VegetationRequest,
};
use farm_baseline::geometry::GeometryValidator;
use farm_baseline::{BaselineError, BaselineResult, BoundaryPolygon, CancelToken, DateWindow, EstimationMethod};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Responder = Box<dyn Fn() -> BaselineResult<ComputationObject> + Send + Sync>;

/// In-memory stand-in for the external computation. Unset kinds fail with
/// `EnvironmentNotConfigured`.
pub struct FakeClient {
    vegetation: Option<Responder>,
    forest: Option<Responder>,
    biomass: Option<Responder>,
    pub vegetation_calls: AtomicUsize,
    pub forest_calls: AtomicUsize,
    pub biomass_calls: AtomicUsize,
    pub last_vegetation_window: Mutex<Option<DateWindow>>,
    pub last_forest_window: Mutex<Option<DateWindow>>,
    pub last_biomass: Mutex<Option<(DateWindow, EstimationMethod, usize)>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            vegetation: None,
            forest: None,
            biomass: None,
            vegetation_calls: AtomicUsize::new(0),
            forest_calls: AtomicUsize::new(0),
            biomass_calls: AtomicUsize::new(0),
            last_vegetation_window: Mutex::new(None),
            last_forest_window: Mutex::new(None),
            last_biomass: Mutex::new(None),
        }
    }

    pub fn with_vegetation(mut self, value: Value) -> Self {
        self.vegetation = Some(object_responder(value));
        self
    }

    pub fn with_forest(mut self, value: Value) -> Self {
        self.forest = Some(object_responder(value));
        self
    }

    pub fn with_biomass(mut self, value: Value) -> Self {
        self.biomass = Some(object_responder(value));
        self
    }

    pub fn failing_vegetation(mut self, err: impl Fn() -> BaselineError + Send + Sync + 'static) -> Self {
        self.vegetation = Some(Box::new(move || Err(err())));
        self
    }

    pub fn failing_forest(mut self, err: impl Fn() -> BaselineError + Send + Sync + 'static) -> Self {
        self.forest = Some(Box::new(move || Err(err())));
        self
    }

    pub fn failing_biomass(mut self, err: impl Fn() -> BaselineError + Send + Sync + 'static) -> Self {
        self.biomass = Some(Box::new(move || Err(err())));
        self
    }

    pub fn total_calls(&self) -> usize {
        self.vegetation_calls.load(Ordering::SeqCst)
            + self.forest_calls.load(Ordering::SeqCst)
            + self.biomass_calls.load(Ordering::SeqCst)
    }
}

fn object_responder(value: Value) -> Responder {
    Box::new(move || match &value {
        Value::Object(map) => Ok(map.clone()),
        other => panic!("fake responses must be objects, got {}", other),
    })
}

fn respond(responder: &Option<Responder>) -> BaselineResult<ComputationObject> {
    match responder {
        Some(respond) => respond(),
        None => Err(BaselineError::EnvironmentNotConfigured {
            detail: "fake client has no response for this kind".into(),
        }),
    }
}

#[async_trait]
impl GeospatialComputationClient for FakeClient {
    async fn vegetation_index(
        &self,
        request: &VegetationRequest<'_>,
        _cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject> {
        self.vegetation_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_vegetation_window.lock().unwrap() = Some(request.window);
        respond(&self.vegetation)
    }

    async fn forest_change(
        &self,
        request: &ForestChangeRequest<'_>,
        _cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject> {
        self.forest_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_forest_window.lock().unwrap() = Some(request.window);
        respond(&self.forest)
    }

    async fn biomass(
        &self,
        request: &BiomassRequest<'_>,
        _cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject> {
        self.biomass_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_biomass.lock().unwrap() = Some((
            request.window,
            request.method,
            request.trees.map_or(0, |t| t.len()),
        ));
        respond(&self.biomass)
    }
}

/// A square of side 0.00284° on the equator, close to 10 ha.
pub fn ten_hectare_square() -> Value {
    let d = 0.00284;
    json!({
        "type": "Polygon",
        "coordinates": [[[0.0, 0.0], [d, 0.0], [d, d], [0.0, d], [0.0, 0.0]]]
    })
}

pub fn ten_hectare_boundary() -> BoundaryPolygon {
    GeometryValidator::validate(&ten_hectare_square()).unwrap()
}

pub fn ndvi_response() -> Value {
    json!({
        "mean": 0.712345,
        "median": 0.73,
        "std": 0.081,
        "min": 0.12,
        "max": 0.91,
        "imageUrl": "https://example.org/ndvi.png",
        "cloudCoverage": 7.456,
        "imagesUsed": 14
    })
}

pub fn farm_document(name: &str) -> Value {
    json!({
        "type": "Feature",
        "properties": { "name": name, "owner": "Cooperativa Andina" },
        "geometry": ten_hectare_square()
    })
}
