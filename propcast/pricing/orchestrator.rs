//! Decides which bundle serves predictions.
//!
//! ```text
//! LOAD_EXISTING --ok--------------------------------> READY
//! LOAD_EXISTING --missing/corrupt--> TRAIN_NEW --ok--> READY
//!                                    TRAIN_NEW --err-> FALLBACK --> READY
//! ```
//!
//! `FALLBACK` cannot fail: if even the synthetic fallback fit errors, a
//! constant model is served. Fallback bundles are never persisted, and a
//! stored fallback bundle is treated like a missing one.

use std::{fmt, sync::Arc, time::Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    bundle::{BundleOrigin, ModelBundle},
    config::{DatasetSettings, GrowthBand, ModelSettings, PricingConfig},
    dataset::{DatasetError, DatasetSource, JsonlDatasetSource, SyntheticDataset},
    encoder::FeatureEncoder,
    error::PricingError,
    models::{FitOptions, RegressionModel, TrainingReport},
    record::TrainingRecord,
    registry::ModelOrigin,
    store::{JsonModelStore, ModelStore},
    telemetry::{emit, PricingTelemetry},
};

/// States of the load / train / fallback machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    /// Reading the persisted bundle.
    LoadExisting,
    /// Fitting a bundle on the configured or synthetic dataset.
    TrainNew,
    /// Fitting the minimal fallback bundle.
    Fallback,
    /// A bundle is available.
    Ready,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LoadExisting => "LOAD_EXISTING",
            Self::TrainNew => "TRAIN_NEW",
            Self::Fallback => "FALLBACK",
            Self::Ready => "READY",
        })
    }
}

/// Outcome of one orchestration run.
#[derive(Debug)]
pub struct Orchestration {
    /// Bundle ready to serve.
    pub bundle: ModelBundle,
    /// How the bundle was obtained.
    pub origin: ModelOrigin,
    /// States visited, ending in `Ready`.
    pub trail: Vec<OrchestratorState>,
    /// Whether the bundle is now persisted in the store. Always `false` for
    /// fallback bundles.
    pub persisted: bool,
}

/// Runs the load / train / fallback chain. At most one run executes at a
/// time per orchestrator.
pub struct ModelOrchestrator {
    store: Arc<dyn ModelStore>,
    dataset: Option<Arc<dyn DatasetSource>>,
    model: ModelSettings,
    data: DatasetSettings,
    growth: GrowthBand,
    telemetry: Option<PricingTelemetry>,
    train_lock: Mutex<()>,
}

impl fmt::Debug for ModelOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelOrchestrator")
            .field("store", &self.store.describe())
            .field("dataset", &self.dataset.as_ref().map(|d| d.label().to_string()))
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ModelOrchestrator {
    /// Creates an orchestrator over `store` with the given configuration.
    /// Without a dataset source, training uses synthetic data.
    #[must_use]
    pub fn new(store: Arc<dyn ModelStore>, config: &PricingConfig) -> Self {
        Self {
            store,
            dataset: None,
            model: config.model.clone(),
            data: config.dataset.clone(),
            growth: config.growth,
            telemetry: None,
            train_lock: Mutex::new(()),
        }
    }

    /// Wires the JSON store and, when configured, the JSONL dataset.
    #[must_use]
    pub fn from_config(config: &PricingConfig) -> Self {
        let orchestrator = Self::new(Arc::new(JsonModelStore::new(&config.model.path)), config);
        match &config.dataset.path {
            Some(path) => orchestrator.with_dataset(Arc::new(JsonlDatasetSource::new(path))),
            None => orchestrator,
        }
    }

    /// Sets the training dataset source.
    #[must_use]
    pub fn with_dataset(mut self, dataset: Arc<dyn DatasetSource>) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Option<PricingTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Store backing this orchestrator.
    #[must_use]
    pub fn store(&self) -> &dyn ModelStore {
        self.store.as_ref()
    }

    /// Reuses the persisted bundle, training a new one when it is missing,
    /// corrupt, or a fallback bundle. Never fails.
    pub fn load_or_train(&self) -> Orchestration {
        let _guard = self.train_lock.lock();
        let mut trail = vec![OrchestratorState::LoadExisting];
        match self.store.load() {
            Ok(bundle) if bundle.origin() == BundleOrigin::Fallback => {
                self.transition(
                    OrchestratorState::LoadExisting,
                    OrchestratorState::TrainNew,
                    &format!("stored bundle {} is a fallback bundle", bundle.id()),
                );
                self.train_chain(trail)
            }
            Ok(bundle) => {
                self.transition(
                    OrchestratorState::LoadExisting,
                    OrchestratorState::Ready,
                    &format!("loaded bundle {}", bundle.id()),
                );
                trail.push(OrchestratorState::Ready);
                Orchestration {
                    bundle,
                    origin: ModelOrigin::Loaded,
                    trail,
                    persisted: true,
                }
            }
            Err(err) => {
                self.transition(
                    OrchestratorState::LoadExisting,
                    OrchestratorState::TrainNew,
                    &err.to_string(),
                );
                self.train_chain(trail)
            }
        }
    }

    /// Trains a fresh bundle regardless of what is persisted. Never fails.
    pub fn retrain(&self) -> Orchestration {
        let _guard = self.train_lock.lock();
        self.train_chain(Vec::new())
    }

    fn train_chain(&self, mut trail: Vec<OrchestratorState>) -> Orchestration {
        trail.push(OrchestratorState::TrainNew);
        let bundle = match self.train_new() {
            Ok(bundle) => {
                self.transition(
                    OrchestratorState::TrainNew,
                    OrchestratorState::Ready,
                    "training succeeded",
                );
                bundle
            }
            Err(err) => {
                self.transition(
                    OrchestratorState::TrainNew,
                    OrchestratorState::Fallback,
                    &err.to_string(),
                );
                trail.push(OrchestratorState::Fallback);
                let bundle = self.fallback();
                self.transition(
                    OrchestratorState::Fallback,
                    OrchestratorState::Ready,
                    bundle.price_model().name(),
                );
                bundle
            }
        };
        trail.push(OrchestratorState::Ready);
        // fallback bundles are served from memory only
        let persisted = bundle.origin() == BundleOrigin::Trained && self.persist(&bundle);
        Orchestration {
            origin: ModelOrigin::from_bundle(bundle.origin()),
            bundle,
            trail,
            persisted,
        }
    }

    fn train_new(&self) -> Result<ModelBundle, PricingError> {
        let (records, source) = self.training_records()?;
        fit_bundle(
            &records,
            &source,
            BundleOrigin::Trained,
            &FitOptions::from_settings(&self.model, self.model.trees),
            Some(&FitOptions::from_settings(&self.model, self.model.growth_trees)),
            &self.model,
            &self.growth,
            self.telemetry.as_ref(),
        )
    }

    fn training_records(&self) -> Result<(Vec<TrainingRecord>, String), PricingError> {
        if let Some(dataset) = &self.dataset {
            match dataset.load() {
                Ok(records) => return Ok((records, dataset.label().to_string())),
                Err(DatasetError::Unavailable(reason)) => emit(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "pricing.orchestrator.dataset_unavailable",
                    json!({ "reason": reason, "substitute": "synthetic" }),
                ),
                Err(err) => return Err(err.into()),
            }
        }
        let synthetic = SyntheticDataset::new(self.data.synthetic_samples, self.model.seed)
            .with_band(self.growth);
        let records = synthetic.load()?;
        Ok((records, synthetic.label().to_string()))
    }

    fn fallback(&self) -> ModelBundle {
        let synthetic =
            SyntheticDataset::fallback(self.data.fallback_samples.max(1), self.model.seed)
                .with_band(self.growth);
        let records = synthetic.generate();
        let options = FitOptions::from_settings(&self.model, self.model.fallback_trees);
        match fit_bundle(
            &records,
            synthetic.label(),
            BundleOrigin::Fallback,
            &options,
            None,
            &self.model,
            &self.growth,
            self.telemetry.as_ref(),
        ) {
            Ok(bundle) => bundle,
            Err(err) => {
                emit(
                    self.telemetry.as_ref(),
                    LogLevel::Error,
                    "pricing.orchestrator.constant_model",
                    json!({ "error": err.to_string() }),
                );
                self.constant_bundle(&records)
            }
        }
    }

    fn constant_bundle(&self, records: &[TrainingRecord]) -> ModelBundle {
        let prices: Vec<f64> = records
            .iter()
            .map(|r| r.price_per_unit_area)
            .filter(|p| p.is_finite())
            .collect();
        let value = if prices.is_empty() {
            15_000.0
        } else {
            prices.iter().sum::<f64>() / prices.len() as f64
        };
        let encoder = match FeatureEncoder::fit(records.iter().map(|r| &r.property)) {
            Ok(encoder) => encoder,
            // fallback records are never empty; keep an empty layout just in case
            Err(_) => FeatureEncoder::empty(),
        };
        let n_features = encoder.width();
        ModelBundle::assemble(
            BundleOrigin::Fallback,
            encoder,
            RegressionModel::Constant { value, n_features },
            None,
            self.growth.fallback_rate,
            None,
        )
    }

    fn persist(&self, bundle: &ModelBundle) -> bool {
        match self.store.save(bundle) {
            Ok(()) => {
                emit(
                    self.telemetry.as_ref(),
                    LogLevel::Info,
                    "pricing.orchestrator.persisted",
                    json!({ "bundle": bundle.id().to_string(), "store": self.store.describe() }),
                );
                true
            }
            Err(err) => {
                emit(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "pricing.orchestrator.persist_failed",
                    json!({ "error": err.to_string(), "store": self.store.describe() }),
                );
                false
            }
        }
    }

    fn transition(&self, from: OrchestratorState, to: OrchestratorState, reason: &str) {
        let level = match to {
            OrchestratorState::Fallback => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        emit(
            self.telemetry.as_ref(),
            level,
            "pricing.orchestrator.transition",
            json!({ "from": from.to_string(), "to": to.to_string(), "reason": reason }),
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn fit_bundle(
    records: &[TrainingRecord],
    source: &str,
    origin: BundleOrigin,
    price_options: &FitOptions,
    growth_options: Option<&FitOptions>,
    settings: &ModelSettings,
    growth: &GrowthBand,
    telemetry: Option<&PricingTelemetry>,
) -> Result<ModelBundle, PricingError> {
    let started = Instant::now();
    let total = records.len();
    let valid: Vec<&TrainingRecord> = records.iter().filter(|r| r.validate().is_ok()).collect();
    let dropped = total - valid.len();
    if valid.is_empty() {
        return Err(PricingError::Training(format!(
            "no valid records among {total} from {source}"
        )));
    }

    let encoder = FeatureEncoder::fit(valid.iter().map(|r| &r.property))?;
    let features = encoder.encode_batch(valid.iter().map(|r| &r.property));
    let prices: Vec<f64> = valid.iter().map(|r| r.price_per_unit_area).collect();
    let (price_model, price_score) = RegressionModel::fit_scored(
        price_options,
        &features,
        &prices,
        settings.validation_fraction,
        settings.seed,
    )?;

    let growth_labels: Option<Vec<f64>> = valid.iter().map(|r| r.growth_rate).collect();
    let (growth_model, growth_score) = match (growth_options, growth_labels) {
        (Some(options), Some(labels)) => {
            let (model, score) = RegressionModel::fit_scored(
                options,
                &features,
                &labels,
                settings.validation_fraction,
                settings.seed,
            )?;
            (Some(model), score)
        }
        _ => (None, None),
    };

    let holdout = crate::models::metrics::holdout_split(
        valid.len(),
        settings.validation_fraction,
        settings.seed,
    )
    .holdout
    .len();
    let report = TrainingReport {
        model: price_model.name().to_string(),
        source: source.to_string(),
        samples: valid.len(),
        dropped,
        holdout,
        price: price_score,
        growth: growth_score,
        growth_model: growth_model.is_some(),
        trained_at: Utc::now(),
    };
    emit(
        telemetry,
        LogLevel::Info,
        "pricing.orchestrator.trained",
        json!({
            "summary": report.summary(),
            "columns": encoder.width(),
            "elapsed_ms": u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }),
    );
    ModelBundle::new(
        origin,
        encoder,
        price_model,
        growth_model,
        growth.fallback_rate,
        Some(report),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::write_jsonl,
        record::PropertyRecord,
        store::StoreError,
    };
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };
    use tempfile::tempdir;

    fn fast_config() -> PricingConfig {
        let mut config = PricingConfig::default();
        config.model.trees = 8;
        config.model.growth_trees = 5;
        config.model.fallback_trees = 5;
        config.model.max_depth = 6;
        config.dataset.synthetic_samples = 80;
        config.dataset.fallback_samples = 40;
        config
    }

    struct BrokenDataset;

    impl DatasetSource for BrokenDataset {
        fn label(&self) -> &str {
            "broken"
        }

        fn load(&self) -> Result<Vec<TrainingRecord>, DatasetError> {
            Err(DatasetError::Invalid {
                line: 1,
                message: "unexpected token".into(),
            })
        }
    }

    struct ReadOnlyStore;

    impl ModelStore for ReadOnlyStore {
        fn load(&self) -> Result<ModelBundle, StoreError> {
            Err(StoreError::NotFound("memory".into()))
        }

        fn save(&self, _bundle: &ModelBundle) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }

        fn describe(&self) -> String {
            "read-only".into()
        }
    }

    #[test]
    fn missing_bundle_trains_and_persists_then_reloads() {
        let dir = tempdir().unwrap();
        let mut config = fast_config();
        config.model.path = dir.path().join("models/bundle.json");
        let orchestrator = ModelOrchestrator::from_config(&config);

        let first = orchestrator.load_or_train();
        assert_eq!(
            first.trail,
            [
                OrchestratorState::LoadExisting,
                OrchestratorState::TrainNew,
                OrchestratorState::Ready
            ]
        );
        assert_eq!(first.origin, ModelOrigin::Trained);
        assert!(first.persisted);
        let report = first.bundle.report().unwrap();
        assert_eq!(report.source, "synthetic");
        assert!(report.growth_model);
        assert!(first.bundle.growth_model().is_some());

        let second = orchestrator.load_or_train();
        assert_eq!(
            second.trail,
            [OrchestratorState::LoadExisting, OrchestratorState::Ready]
        );
        assert_eq!(second.origin, ModelOrigin::Loaded);
        assert_eq!(second.bundle.id(), first.bundle.id());
    }

    #[test]
    fn corrupt_bundle_then_failed_training_falls_back() {
        let dir = tempdir().unwrap();
        let mut config = fast_config();
        config.model.path = dir.path().join("bundle.json");
        fs::write(&config.model.path, b"{ definitely not a bundle").unwrap();

        let orchestrator =
            ModelOrchestrator::from_config(&config).with_dataset(Arc::new(BrokenDataset));
        let outcome = orchestrator.load_or_train();
        assert_eq!(
            outcome.trail,
            [
                OrchestratorState::LoadExisting,
                OrchestratorState::TrainNew,
                OrchestratorState::Fallback,
                OrchestratorState::Ready
            ]
        );
        assert_eq!(outcome.origin, ModelOrigin::Fallback);
        assert!(outcome.bundle.growth_model().is_none());

        let record = PropertyRecord::new("Residential Apartment", "Thane", "Powai", 800.0)
            .with_bedrooms(2);
        let features = outcome.bundle.encode(&record);
        let price = outcome.bundle.predict_price_per_unit_area(&features).unwrap();
        assert!(price > 0.0);
    }

    #[test]
    fn fallback_bundle_is_not_reused_once_training_recovers() {
        let dir = tempdir().unwrap();
        let mut config = fast_config();
        config.model.path = dir.path().join("bundle.json");

        let degraded = ModelOrchestrator::from_config(&config)
            .with_dataset(Arc::new(BrokenDataset))
            .load_or_train();
        assert_eq!(degraded.origin, ModelOrigin::Fallback);
        assert!(!degraded.persisted);
        assert!(!config.model.path.exists());

        let healthy = ModelOrchestrator::from_config(&config).load_or_train();
        assert!(healthy.trail.contains(&OrchestratorState::TrainNew));
        assert_eq!(healthy.origin, ModelOrigin::Trained);
        assert!(healthy.persisted);
        assert_ne!(healthy.bundle.id(), degraded.bundle.id());
    }

    #[test]
    fn stored_fallback_bundle_counts_as_missing() {
        let dir = tempdir().unwrap();
        let mut config = fast_config();
        config.model.path = dir.path().join("bundle.json");
        let orchestrator = ModelOrchestrator::from_config(&config);
        let fallback = orchestrator.fallback();
        assert_eq!(fallback.origin(), BundleOrigin::Fallback);
        JsonModelStore::new(&config.model.path).save(&fallback).unwrap();

        let outcome = orchestrator.load_or_train();
        assert_eq!(
            outcome.trail,
            [
                OrchestratorState::LoadExisting,
                OrchestratorState::TrainNew,
                OrchestratorState::Ready
            ]
        );
        assert_eq!(outcome.origin, ModelOrigin::Trained);
        assert_eq!(
            JsonModelStore::new(&config.model.path).load().unwrap().id(),
            outcome.bundle.id()
        );
    }

    struct OverlapDataset {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl DatasetSource for OverlapDataset {
        fn label(&self) -> &str {
            "overlap"
        }

        fn load(&self) -> Result<Vec<TrainingRecord>, DatasetError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(SyntheticDataset::new(30, 5).generate())
        }
    }

    #[test]
    fn concurrent_retrains_never_overlap() {
        let dataset = Arc::new(OverlapDataset {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Arc::new(
            ModelOrchestrator::new(Arc::new(ReadOnlyStore), &fast_config())
                .with_dataset(Arc::clone(&dataset) as Arc<dyn DatasetSource>),
        );

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                thread::spawn(move || orchestrator.retrain().origin)
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap(), ModelOrigin::Trained);
        }

        assert_eq!(dataset.calls.load(Ordering::SeqCst), 4);
        assert_eq!(dataset.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn persistence_failure_is_not_fatal() {
        let orchestrator = ModelOrchestrator::new(Arc::new(ReadOnlyStore), &fast_config());
        let outcome = orchestrator.load_or_train();
        assert_eq!(outcome.origin, ModelOrigin::Trained);
        assert!(!outcome.persisted);
        assert_eq!(outcome.trail.last(), Some(&OrchestratorState::Ready));
    }

    #[test]
    fn missing_dataset_uses_synthetic_and_drops_invalid_rows() {
        let dir = tempdir().unwrap();
        let config = fast_config();

        let absent = ModelOrchestrator::new(Arc::new(ReadOnlyStore), &config)
            .with_dataset(Arc::new(JsonlDatasetSource::new(dir.path().join("none.jsonl"))));
        let outcome = absent.retrain();
        assert_eq!(outcome.bundle.report().unwrap().source, "synthetic");
        assert_eq!(
            outcome.trail,
            [OrchestratorState::TrainNew, OrchestratorState::Ready]
        );

        let mut records = SyntheticDataset::new(40, 3).generate();
        records[0].price_per_unit_area = -5.0;
        let path = dir.path().join("train.jsonl");
        write_jsonl(&path, &records).unwrap();
        let real = ModelOrchestrator::new(Arc::new(ReadOnlyStore), &config)
            .with_dataset(Arc::new(JsonlDatasetSource::new(&path)));
        let report = real.retrain().bundle.report().cloned().unwrap();
        assert_eq!(report.source, "dataset");
        assert_eq!(report.dropped, 1);
        assert_eq!(report.samples, 39);
    }

    #[test]
    fn records_without_growth_labels_use_the_fallback_rate() {
        let mut records = SyntheticDataset::new(30, 9).generate();
        records[5].growth_rate = None;
        let config = fast_config();
        let bundle = fit_bundle(
            &records,
            "test",
            BundleOrigin::Trained,
            &FitOptions::from_settings(&config.model, 5),
            Some(&FitOptions::from_settings(&config.model, 5)),
            &config.model,
            &config.growth,
            None,
        )
        .unwrap();
        assert!(bundle.growth_model().is_none());
        assert!((bundle.fallback_growth_rate() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn constant_bundle_is_servable() {
        let orchestrator = ModelOrchestrator::new(Arc::new(ReadOnlyStore), &fast_config());
        let records = SyntheticDataset::fallback(10, 1).generate();
        let bundle = orchestrator.constant_bundle(&records);
        bundle.validate().unwrap();
        let features = bundle.encode(&records[0].property);
        assert!(bundle.predict_price_per_unit_area(&features).unwrap() > 0.0);
    }
}
