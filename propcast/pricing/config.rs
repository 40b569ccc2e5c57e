use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Model training and persistence settings.
    #[serde(default)]
    pub model: ModelSettings,
    /// Training data settings.
    #[serde(default)]
    pub dataset: DatasetSettings,
    /// Growth-rate band and fallback.
    #[serde(default)]
    pub growth: GrowthBand,
    /// Geospatial lookup settings.
    #[serde(default)]
    pub geo: GeoSettings,
    /// Projection horizon limits.
    #[serde(default)]
    pub projection: ProjectionSettings,
    /// Log sink settings.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl PricingConfig {
    /// Loads configuration from a TOML file. Relative paths inside the file
    /// are resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pricing config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base);
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        self.growth.validate()?;
        self.geo.validate()?;
        self.projection.validate()?;
        self.model.validate()?;
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.model.path.is_relative() {
            self.model.path = base.join(&self.model.path);
        }
        if let Some(dataset) = &mut self.dataset.path {
            if dataset.is_relative() {
                *dataset = base.join(&*dataset);
            }
        }
        if let Some(log) = &mut self.logging.path {
            if log.is_relative() {
                *log = base.join(&*log);
            }
        }
    }
}

/// Regression family used for the price and growth models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Bagged regression trees.
    #[default]
    Forest,
    /// Gradient-descent linear regression.
    Linear,
}

/// Model hyper-parameters and persistence location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Where the bundle is persisted.
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    /// Regression family.
    #[serde(default)]
    pub kind: ModelKind,
    /// Seed for every random choice made during training.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Trees in the price forest.
    #[serde(default = "default_trees")]
    pub trees: usize,
    /// Trees in the growth-rate forest.
    #[serde(default = "default_growth_trees")]
    pub growth_trees: usize,
    /// Trees in the synthetic fallback forest.
    #[serde(default = "default_growth_trees")]
    pub fallback_trees: usize,
    /// Maximum tree depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Minimum samples kept in each leaf.
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// Fraction of columns considered at each split.
    #[serde(default = "default_feature_fraction")]
    pub feature_fraction: f64,
    /// Step size for the linear model.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Passes over the data for the linear model.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Share of records held out for the training report.
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
}

impl ModelSettings {
    fn validate(&self) -> Result<()> {
        if self.trees == 0 || self.growth_trees == 0 || self.fallback_trees == 0 {
            bail!("tree counts must be positive");
        }
        if self.max_depth == 0 || self.min_samples_leaf == 0 {
            bail!("max_depth and min_samples_leaf must be positive");
        }
        if !(self.feature_fraction > 0.0 && self.feature_fraction <= 1.0) {
            bail!("feature_fraction must be in (0, 1], got {}", self.feature_fraction);
        }
        if !(0.0..0.9).contains(&self.validation_fraction) {
            bail!(
                "validation_fraction must be in [0, 0.9), got {}",
                self.validation_fraction
            );
        }
        if !(self.learning_rate > 0.0) || self.epochs == 0 {
            bail!("linear model needs a positive learning rate and epoch count");
        }
        Ok(())
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            kind: ModelKind::default(),
            seed: default_seed(),
            trees: default_trees(),
            growth_trees: default_growth_trees(),
            fallback_trees: default_growth_trees(),
            max_depth: default_max_depth(),
            min_samples_leaf: default_min_samples_leaf(),
            feature_fraction: default_feature_fraction(),
            learning_rate: default_learning_rate(),
            epochs: default_epochs(),
            validation_fraction: default_validation_fraction(),
        }
    }
}

/// Training data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// JSONL file of training records; synthetic data is used when unset
    /// or unreadable.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Size of the substitute synthetic dataset.
    #[serde(default = "default_synthetic_samples")]
    pub synthetic_samples: usize,
    /// Size of the fallback dataset.
    #[serde(default = "default_fallback_samples")]
    pub fallback_samples: usize,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            path: None,
            synthetic_samples: default_synthetic_samples(),
            fallback_samples: default_fallback_samples(),
        }
    }
}

/// Allowed band for annual growth rates plus the fallback rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthBand {
    /// Lower bound (inclusive).
    #[serde(default = "default_growth_min")]
    pub min: f64,
    /// Upper bound (inclusive).
    #[serde(default = "default_growth_max")]
    pub max: f64,
    /// Rate used when a bundle has no growth model.
    #[serde(default = "default_fallback_rate")]
    pub fallback_rate: f64,
}

impl GrowthBand {
    /// Clamps a raw rate into the band. Non-finite input yields the
    /// fallback rate.
    #[must_use]
    pub fn clamp(&self, rate: f64) -> f64 {
        if rate.is_finite() {
            rate.clamp(self.min, self.max)
        } else {
            self.fallback_rate.clamp(self.min, self.max)
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min) || !(0.0..=1.0).contains(&self.max) {
            bail!("growth band must lie within [0, 1]");
        }
        if self.min >= self.max {
            bail!("invalid growth band: min {} >= max {}", self.min, self.max);
        }
        if !(self.min..=self.max).contains(&self.fallback_rate) {
            bail!(
                "fallback growth rate {} outside band {}..{}",
                self.fallback_rate,
                self.min,
                self.max
            );
        }
        Ok(())
    }
}

impl Default for GrowthBand {
    fn default() -> Self {
        Self {
            min: default_growth_min(),
            max: default_growth_max(),
            fallback_rate: default_fallback_rate(),
        }
    }
}

/// Geospatial lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoSettings {
    /// Nearby-properties endpoint; defaults are used when unset.
    #[serde(default)]
    pub nearby_url: Option<String>,
    /// Points-of-interest endpoint.
    #[serde(default)]
    pub poi_url: Option<String>,
    /// Search radius in kilometres.
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
    /// Per-lookup timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Count reported when nearby data is unavailable.
    #[serde(default = "default_nearby_count")]
    pub default_nearby_count: usize,
    /// Mean price reported when nearby data is unavailable.
    #[serde(default = "default_mean_price")]
    pub default_mean_price: f64,
    /// Upper bound on the total hotspot premium.
    #[serde(default = "default_hotspot_cap")]
    pub hotspot_cap: f64,
    /// Use the built-in POI catalogue when no POI endpoint is configured.
    #[serde(default = "default_true")]
    pub builtin_pois: bool,
}

impl GeoSettings {
    /// Lookup timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if !(self.hotspot_cap > 0.0 && self.hotspot_cap <= 1.0) {
            bail!("hotspot_cap must be in (0, 1], got {}", self.hotspot_cap);
        }
        if !(self.radius_km > 0.0) {
            bail!("radius_km must be positive");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be positive");
        }
        if !(self.default_mean_price > 0.0) {
            bail!("default_mean_price must be positive");
        }
        Ok(())
    }
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            nearby_url: None,
            poi_url: None,
            radius_km: default_radius_km(),
            timeout_ms: default_timeout_ms(),
            default_nearby_count: default_nearby_count(),
            default_mean_price: default_mean_price(),
            hotspot_cap: default_hotspot_cap(),
            builtin_pois: true,
        }
    }
}

/// Projection horizon limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionSettings {
    /// Longest horizon a request may ask for, in years.
    #[serde(default = "default_max_years")]
    pub max_years: u32,
}

impl ProjectionSettings {
    fn validate(self) -> Result<()> {
        if self.max_years == 0 || self.max_years > MAX_YEARS_CEILING {
            bail!(
                "projection max_years must be within 1..={MAX_YEARS_CEILING}, got {}",
                self.max_years
            );
        }
        Ok(())
    }
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            max_years: default_max_years(),
        }
    }
}

/// Log sink settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// JSON-lines log file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Mirror records to stderr when no file is configured.
    #[serde(default)]
    pub stderr: bool,
}

const MAX_YEARS_CEILING: u32 = 200;

const fn default_max_years() -> u32 {
    50
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/price_prediction_model.json")
}

const fn default_seed() -> u64 {
    42
}

const fn default_trees() -> usize {
    100
}

const fn default_growth_trees() -> usize {
    50
}

const fn default_max_depth() -> usize {
    12
}

const fn default_min_samples_leaf() -> usize {
    2
}

const fn default_feature_fraction() -> f64 {
    1.0
}

const fn default_learning_rate() -> f64 {
    0.05
}

const fn default_epochs() -> usize {
    300
}

const fn default_validation_fraction() -> f64 {
    0.2
}

const fn default_synthetic_samples() -> usize {
    200
}

const fn default_fallback_samples() -> usize {
    100
}

const fn default_growth_min() -> f64 {
    0.02
}

const fn default_growth_max() -> f64 {
    0.10
}

const fn default_fallback_rate() -> f64 {
    0.05
}

const fn default_radius_km() -> f64 {
    2.0
}

const fn default_timeout_ms() -> u64 {
    5_000
}

const fn default_nearby_count() -> usize {
    5
}

const fn default_mean_price() -> f64 {
    15_000.0
}

const fn default_hotspot_cap() -> f64 {
    0.25
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = PricingConfig::default();
        config.validate().unwrap();
        assert!((config.growth.min - 0.02).abs() < f64::EPSILON);
        assert!((config.growth.max - 0.10).abs() < f64::EPSILON);
        assert!((config.geo.hotspot_cap - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.geo.default_nearby_count, 5);
    }

    #[test]
    fn loads_and_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pricing.toml");
        fs::write(
            &path,
            r#"
[model]
path = "models/bundle.json"
kind = "linear"
trees = 20

[dataset]
path = "data/mumbai.jsonl"

[geo]
timeout_ms = 250
"#,
        )
        .unwrap();
        let config = PricingConfig::load(&path).unwrap();
        assert!(config.model.path.is_absolute());
        assert_eq!(config.model.kind, ModelKind::Linear);
        assert_eq!(config.model.trees, 20);
        assert_eq!(config.model.growth_trees, 50);
        assert!(config.dataset.path.unwrap().ends_with("data/mumbai.jsonl"));
        assert_eq!(config.geo.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn bundled_sample_config_parses() {
        let config: PricingConfig = toml::from_str(include_str!("../propcast.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.model.kind, ModelKind::Forest);
        assert!(config.geo.builtin_pois);
        assert!(config.logging.path.is_some());
    }

    #[test]
    fn projection_horizon_is_bounded() {
        assert_eq!(PricingConfig::default().projection.max_years, 50);
        let dir = tempdir().unwrap();
        let path = dir.path().join("pricing.toml");
        fs::write(&path, "[projection]\nmax_years = 20\n").unwrap();
        assert_eq!(PricingConfig::load(&path).unwrap().projection.max_years, 20);
        fs::write(&path, "[projection]\nmax_years = 0\n").unwrap();
        assert!(PricingConfig::load(&path).is_err());
        fs::write(&path, "[projection]\nmax_years = 100000\n").unwrap();
        assert!(PricingConfig::load(&path).is_err());
    }

    #[test]
    fn rejects_inverted_growth_band() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pricing.toml");
        fs::write(&path, "[growth]\nmin = 0.2\nmax = 0.1\nfallback_rate = 0.15\n").unwrap();
        assert!(PricingConfig::load(&path).is_err());
    }

    #[test]
    fn clamps_into_band() {
        let band = GrowthBand::default();
        assert!((band.clamp(0.5) - 0.10).abs() < f64::EPSILON);
        assert!((band.clamp(-0.3) - 0.02).abs() < f64::EPSILON);
        assert!((band.clamp(f64::NAN) - 0.05).abs() < f64::EPSILON);
    }
}
