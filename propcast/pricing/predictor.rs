use std::{path::Path, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    bundle::{GrowthSource, ModelBundle},
    config::{GrowthBand, PricingConfig},
    dataset::DatasetSource,
    error::PricingError,
    geo::{hotspot::HotspotImpact, GeoEnricher},
    orchestrator::{ModelOrchestrator, OrchestratorState},
    projection::{project, round2, YearlyProjection},
    record::{PredictionRequest, PropertyRecord},
    registry::{BundleRegistry, ModelOrigin, ServingBundle},
    store::ModelStore,
    telemetry::{emit, PricingTelemetry},
};

/// Answer to one prediction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    /// Current price including the hotspot premium.
    pub current_price: f64,
    /// `current_price` divided by the area.
    pub current_price_per_unit_area: f64,
    /// Applied annual growth rate, in percent.
    pub annual_growth_rate_percent: f64,
    /// Listings found nearby (or the default).
    pub nearby_property_count: usize,
    /// Mean nearby price per square foot.
    pub mean_nearby_price: Option<f64>,
    /// Hotspot premium; null when there is no location signal.
    pub hotspot_impact: Option<HotspotImpact>,
    /// Whether coordinates were supplied and used.
    pub location_factor: bool,
    /// One entry per future year, in order.
    pub future_projections: Vec<YearlyProjection>,
    /// How the serving bundle was obtained.
    pub model_origin: ModelOrigin,
    /// Serving bundle id.
    pub bundle_id: Uuid,
    /// Serving bundle generation.
    pub generation: u64,
    /// Where the growth rate came from.
    pub growth_rate_source: GrowthSource,
}

/// Outcome of a retrain request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retrained {
    /// Generation now serving.
    pub generation: u64,
    /// Id of the new bundle.
    pub bundle_id: Uuid,
    /// How the new bundle was obtained.
    pub origin: ModelOrigin,
    /// States visited by the orchestrator.
    pub trail: Vec<OrchestratorState>,
    /// Whether the new bundle was persisted.
    pub persisted: bool,
}

/// Prediction service: shared bundle, geo enrichment, and projection.
pub struct PricePredictor {
    registry: BundleRegistry,
    orchestrator: Arc<ModelOrchestrator>,
    geo: GeoEnricher,
    growth: GrowthBand,
    max_years: u32,
    telemetry: Option<PricingTelemetry>,
}

impl std::fmt::Debug for PricePredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricePredictor")
            .field("generation", &self.registry.current().generation)
            .field("orchestrator", &self.orchestrator)
            .field("geo", &self.geo)
            .finish_non_exhaustive()
    }
}

impl PricePredictor {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> PricePredictorBuilder {
        PricePredictorBuilder::default()
    }

    /// Snapshot of the serving bundle.
    #[must_use]
    pub fn current(&self) -> Arc<ServingBundle> {
        self.registry.current()
    }

    /// Predicts the current price and `years` yearly projections.
    pub async fn predict(
        &self,
        record: &PropertyRecord,
        years: u32,
    ) -> Result<PredictionResult, PricingError> {
        let started = Instant::now();
        let outcome = self.predict_inner(record, years).await;
        match &outcome {
            Ok(result) => emit(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "pricing.predict.completed",
                json!({
                    "generation": result.generation,
                    "years": years,
                    "location": result.location_factor,
                    "growth_source": result.growth_rate_source,
                    "elapsed_ms": u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                }),
            ),
            Err(err) => emit(
                self.telemetry.as_ref(),
                LogLevel::Warn,
                "pricing.predict.failed",
                json!({ "error": err.to_string(), "kind": err.kind() }),
            ),
        }
        outcome
    }

    /// Predicts a request envelope.
    pub async fn predict_request(
        &self,
        request: &PredictionRequest,
    ) -> Result<PredictionResult, PricingError> {
        self.predict(&request.record, request.years).await
    }

    async fn predict_inner(
        &self,
        record: &PropertyRecord,
        years: u32,
    ) -> Result<PredictionResult, PricingError> {
        record.validate()?;
        if years == 0 {
            return Err(PricingError::invalid("years must be a positive integer"));
        }
        if years > self.max_years {
            return Err(PricingError::invalid(format!(
                "years must be at most {}, got {years}",
                self.max_years
            )));
        }

        let serving = self.registry.current();
        let bundle = &serving.bundle;
        let features = bundle.encode(record);
        let price_per_unit_area = bundle.predict_price_per_unit_area(&features)?;
        if !(price_per_unit_area.is_finite() && price_per_unit_area > 0.0) {
            return Err(PricingError::Internal(format!(
                "{} model predicted a non-positive price per unit area ({price_per_unit_area})",
                bundle.price_model().name()
            )));
        }

        let coordinates = record.coordinates();
        let (nearby, hotspot) = self.geo.enrich(coordinates).await;

        let mut base_price = price_per_unit_area * record.area_sqft;
        if let Some(impact) = &hotspot {
            base_price *= 1.0 + impact.total_impact;
        }
        let (growth_rate, growth_source) = bundle.predict_growth_rate(&features, &self.growth)?;
        let projections = project(
            base_price,
            record.area_sqft,
            growth_rate,
            years,
            Utc::now().year(),
        )?;

        Ok(PredictionResult {
            current_price: round2(base_price),
            current_price_per_unit_area: round2(base_price / record.area_sqft),
            annual_growth_rate_percent: round2(growth_rate * 100.0),
            nearby_property_count: nearby.count,
            mean_nearby_price: nearby.mean_price_per_unit_area.map(round2),
            hotspot_impact: hotspot,
            location_factor: coordinates.is_some(),
            future_projections: projections
                .into_iter()
                .map(YearlyProjection::rounded)
                .collect(),
            model_origin: serving.origin,
            bundle_id: bundle.id(),
            generation: serving.generation,
            growth_rate_source: growth_source,
        })
    }

    /// Trains a fresh bundle on a blocking thread and swaps it in.
    pub async fn retrain(&self) -> Result<Retrained, PricingError> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let outcome = tokio::task::spawn_blocking(move || orchestrator.retrain())
            .await
            .map_err(|err| PricingError::Internal(format!("retrain task failed: {err}")))?;
        let bundle_id = outcome.bundle.id();
        let generation = self.registry.replace(outcome.bundle, outcome.origin);
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "pricing.predictor.swapped",
            json!({ "generation": generation, "bundle": bundle_id.to_string() }),
        );
        Ok(Retrained {
            generation,
            bundle_id,
            origin: outcome.origin,
            trail: outcome.trail,
            persisted: outcome.persisted,
        })
    }
}

/// Builder for [`PricePredictor`].
#[derive(Default)]
pub struct PricePredictorBuilder {
    config: PricingConfig,
    telemetry: Option<PricingTelemetry>,
    store: Option<Arc<dyn ModelStore>>,
    dataset: Option<Arc<dyn DatasetSource>>,
    geo: Option<GeoEnricher>,
    bundle: Option<ModelBundle>,
}

impl PricePredictorBuilder {
    /// Uses the given configuration.
    #[must_use]
    pub fn config(mut self, config: PricingConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads configuration from a TOML file.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config =
            PricingConfig::load(path).context("loading pricing configuration")?;
        Ok(self)
    }

    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: PricingTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Overrides the model store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Overrides the training dataset.
    #[must_use]
    pub fn dataset(mut self, dataset: Arc<dyn DatasetSource>) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Overrides geo enrichment.
    #[must_use]
    pub fn geo(mut self, geo: GeoEnricher) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Serves `bundle` first instead of running the orchestrator.
    #[must_use]
    pub fn bundle(mut self, bundle: ModelBundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Builds the predictor. Unless a bundle was injected, this loads or
    /// trains one and may block for the duration of training.
    pub fn build(self) -> Result<PricePredictor> {
        let config = self.config;
        config.validate().context("invalid pricing configuration")?;
        let telemetry = self.telemetry;

        let mut orchestrator = match self.store {
            Some(store) => ModelOrchestrator::new(store, &config),
            None => ModelOrchestrator::from_config(&config),
        };
        if let Some(dataset) = self.dataset {
            orchestrator = orchestrator.with_dataset(dataset);
        }
        let orchestrator = orchestrator.with_telemetry(telemetry.clone());

        let geo = match self.geo {
            Some(geo) => geo,
            None => GeoEnricher::from_settings(&config.geo)
                .context("building geospatial lookups")?,
        }
        .with_telemetry(telemetry.clone());

        let registry = match self.bundle {
            Some(bundle) => {
                bundle.validate().context("injected bundle is invalid")?;
                let origin = ModelOrigin::from_bundle(bundle.origin());
                BundleRegistry::new(bundle, origin)
            }
            None => {
                let outcome = orchestrator.load_or_train();
                BundleRegistry::new(outcome.bundle, outcome.origin)
            }
        };

        let serving = registry.current();
        emit(
            telemetry.as_ref(),
            LogLevel::Info,
            "pricing.predictor.ready",
            json!({
                "bundle": serving.bundle.id().to_string(),
                "origin": serving.origin,
                "columns": serving.bundle.encoder().width(),
            }),
        );

        Ok(PricePredictor {
            registry,
            orchestrator: Arc::new(orchestrator),
            geo,
            growth: config.growth,
            max_years: config.projection.max_years,
            telemetry,
        })
    }
}
