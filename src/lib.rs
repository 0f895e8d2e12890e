//! Farm environmental baselines: vegetation index, EUDR deforestation
//! compliance and carbon stock, computed by an external geospatial tool
//! behind [`client::GeospatialComputationClient`].

pub mod batch;
pub mod carbon;
pub mod client;
pub mod config;
pub mod deforestation;
pub mod engine;
pub mod error;
pub mod farm;
pub mod geometry;
pub mod invoker;
pub mod report;
pub mod result_parser;
pub mod temporal;
pub mod types;
pub mod vegetation;

pub use config::{BaselineConfig, ConfigError};
pub use engine::{AnalysisOptions, AnalysisOutcome, AnalysisSelection, BaselineEngine, FarmAnalysis};
pub use error::{BaselineError, BaselineResult, StatusClass};
pub use invoker::{cancellation, CancelHandle, CancelToken};
pub use types::*;
