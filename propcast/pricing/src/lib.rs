#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Propcast pricing pipeline: feature encoding, regression models, geospatial
//! premiums, training/fallback orchestration, and multi-year projection.

/// Error taxonomy shared by every pipeline stage.
#[path = "../error.rs"]
pub mod error;

/// Property and training record types.
#[path = "../record.rs"]
pub mod record;

/// TOML-backed pipeline configuration.
#[path = "../config.rs"]
pub mod config;

/// Telemetry handle wrapping the shared JSON logger.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// One-hot + standardization feature encoder.
#[path = "../encoder.rs"]
pub mod encoder;

/// Regression models, metrics, and training reports.
#[path = "../models/main.rs"]
pub mod models;

/// Training dataset sources and synthetic generators.
#[path = "../dataset.rs"]
pub mod dataset;

/// Immutable model bundle served to predictions.
#[path = "../bundle.rs"]
pub mod bundle;

/// Bundle persistence.
#[path = "../store.rs"]
pub mod store;

/// Shared slot holding the active bundle.
#[path = "../registry.rs"]
pub mod registry;

/// Geospatial enrichment: nearby statistics and hotspot impact.
#[path = "../geo/main.rs"]
pub mod geo;

/// Year-by-year price projection.
#[path = "../projection.rs"]
pub mod projection;

/// Load / train / fallback state machine.
#[path = "../orchestrator.rs"]
pub mod orchestrator;

/// Request-level prediction service.
#[path = "../predictor.rs"]
pub mod predictor;

pub use bundle::{BundleOrigin, GrowthSource, ModelBundle};
pub use config::{GeoSettings, GrowthBand, ModelKind, PricingConfig, ProjectionSettings};
pub use dataset::{DatasetSource, JsonlDatasetSource, SyntheticDataset};
pub use encoder::{EncodedFeatureVector, FeatureEncoder};
pub use error::{ErrorKind, ErrorPayload, PricingError};
pub use geo::{
    hotspot::{HotspotImpact, ImpactClass, PoiCategory, PointOfInterest},
    lookup::{LookupError, NearbyPropertyLookup, PoiLookup},
    Coordinates, GeoEnricher, NearbyStats,
};
pub use models::{RegressionModel, TrainingReport};
pub use orchestrator::{ModelOrchestrator, Orchestration, OrchestratorState};
pub use predictor::{PredictionResult, PricePredictor, PricePredictorBuilder, Retrained};
pub use projection::{project, YearlyProjection};
pub use record::{FurnishStatus, PredictionRequest, PropertyRecord, TrainingRecord};
pub use registry::{BundleRegistry, ModelOrigin, ServingBundle};
pub use store::{JsonModelStore, ModelStore};
pub use telemetry::{PricingTelemetry, PricingTelemetryBuilder};
