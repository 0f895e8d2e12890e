//! The geospatial computation capability the analyzers depend on.
//!
//! Analyzers only see [`GeospatialComputationClient`]; the subprocess
//! implementation lives in [`ScriptComputationClient`]. An HTTP service or a
//! native library would implement the same trait.

use crate::error::BaselineResult;
use crate::invoker::{CancelToken, ComputationInvoker, TempInput};
use crate::result_parser::ResultParser;
use crate::types::{BoundaryPolygon, ComputationKind, DateWindow, EstimationMethod, TreeMeasurement};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::ffi::OsString;

pub type ComputationObject = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct VegetationRequest<'a> {
    pub polygon: &'a BoundaryPolygon,
    pub window: DateWindow,
}

#[derive(Debug, Clone)]
pub struct ForestChangeRequest<'a> {
    pub polygon: &'a BoundaryPolygon,
    pub window: DateWindow,
    pub project_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct BiomassRequest<'a> {
    pub polygon: &'a BoundaryPolygon,
    /// Window the estimate covers. `carbon_baseline.py` derives the same
    /// window itself and takes no date flags.
    pub window: DateWindow,
    pub project_id: &'a str,
    pub method: EstimationMethod,
    pub trees: Option<&'a [TreeMeasurement]>,
}

#[async_trait]
pub trait GeospatialComputationClient: Send + Sync {
    /// Vegetation-index summary statistics over the polygon and window.
    async fn vegetation_index(
        &self,
        request: &VegetationRequest<'_>,
        cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject>;

    /// Forest-cover loss over the polygon and window.
    async fn forest_change(
        &self,
        request: &ForestChangeRequest<'_>,
        cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject>;

    /// Above-ground biomass estimate over the polygon.
    async fn biomass(
        &self,
        request: &BiomassRequest<'_>,
        cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject>;
}

/// Runs one script per analysis kind through [`ComputationInvoker`].
pub struct ScriptComputationClient {
    invoker: ComputationInvoker,
}

impl ScriptComputationClient {
    pub fn new(invoker: ComputationInvoker) -> Self {
        Self { invoker }
    }

    pub fn invoker(&self) -> &ComputationInvoker {
        &self.invoker
    }

    fn polygon_input(&self, polygon: &BoundaryPolygon) -> BaselineResult<TempInput> {
        TempInput::write_json(
            self.invoker.config().temp_dir.as_deref(),
            "polygon-",
            &polygon.to_geojson(),
        )
    }

    /// Inputs stay alive until the process has exited, then are removed.
    async fn run(
        &self,
        kind: ComputationKind,
        args: Vec<OsString>,
        _inputs: Vec<TempInput>,
        cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject> {
        let output = self.invoker.invoke(kind, &args, cancel).await?;
        ResultParser::parse(&output.stdout).map_err(|err| {
            tracing::error!(%kind, error = %err, "computation output is not a JSON object");
            err
        })
    }
}

fn flag(name: &str, value: impl Into<OsString>) -> [OsString; 2] {
    [OsString::from(name), value.into()]
}

#[async_trait]
impl GeospatialComputationClient for ScriptComputationClient {
    async fn vegetation_index(
        &self,
        request: &VegetationRequest<'_>,
        cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject> {
        let polygon = self.polygon_input(request.polygon)?;
        let args = [
            flag("--polygon", polygon.path()),
            flag("--start-date", request.window.start_str()),
            flag("--end-date", request.window.end_str()),
        ]
        .concat();
        self.run(ComputationKind::Vegetation, args, vec![polygon], cancel)
            .await
    }

    async fn forest_change(
        &self,
        request: &ForestChangeRequest<'_>,
        cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject> {
        let polygon = self.polygon_input(request.polygon)?;
        let args = [
            flag("--polygon", polygon.path()),
            flag("--start-date", request.window.start_str()),
            flag("--end-date", request.window.end_str()),
            flag("--project-id", request.project_id),
        ]
        .concat();
        self.run(ComputationKind::Deforestation, args, vec![polygon], cancel)
            .await
    }

    async fn biomass(
        &self,
        request: &BiomassRequest<'_>,
        cancel: &CancelToken,
    ) -> BaselineResult<ComputationObject> {
        let polygon = self.polygon_input(request.polygon)?;
        let mut args = [
            flag("--polygon", polygon.path()),
            flag("--project-id", request.project_id),
            flag("--biomass-method", request.method.as_str()),
        ]
        .concat();
        let mut inputs = vec![polygon];

        if let Some(trees) = request.trees.filter(|t| !t.is_empty()) {
            let inventory = TempInput::write_json(
                self.invoker.config().temp_dir.as_deref(),
                "trees-",
                &trees,
            )?;
            args.extend(flag("--tree-inventory", inventory.path()));
            inputs.push(inventory);
        }

        self.run(ComputationKind::CarbonBaseline, args, inputs, cancel)
            .await
    }
}
