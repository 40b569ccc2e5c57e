use std::{
    f64::consts::PI,
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use rand::{rngs::SmallRng, seq::SliceRandom, Rng, SeedableRng};
use thiserror::Error;

use crate::{
    config::GrowthBand,
    record::{FurnishStatus, PropertyRecord, TrainingRecord},
};

/// Errors that can occur while obtaining training data.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The source does not exist or cannot be read.
    #[error("dataset unavailable: {0}")]
    Unavailable(String),
    /// The source exists but a row is malformed.
    #[error("dataset line {line} is invalid: {message}")]
    Invalid {
        /// One-based line number.
        line: usize,
        /// Parser message.
        message: String,
    },
}

/// Anything that can hand the orchestrator a set of labelled records.
pub trait DatasetSource: Send + Sync {
    /// Short label used in reports and logs.
    fn label(&self) -> &str;

    /// Loads every record.
    fn load(&self) -> Result<Vec<TrainingRecord>, DatasetError>;
}

/// JSON-lines file with one [`TrainingRecord`] per line.
#[derive(Debug, Clone)]
pub struct JsonlDatasetSource {
    path: PathBuf,
}

impl JsonlDatasetSource {
    /// Creates a source reading from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the dataset file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetSource for JsonlDatasetSource {
    fn label(&self) -> &str {
        "dataset"
    }

    fn load(&self) -> Result<Vec<TrainingRecord>, DatasetError> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|err| DatasetError::Unavailable(format!("{}: {err}", self.path.display())))?;
        let mut records = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = serde_json::from_str::<TrainingRecord>(trimmed).map_err(|err| {
                DatasetError::Invalid {
                    line: idx + 1,
                    message: err.to_string(),
                }
            })?;
            records.push(record);
        }
        if records.is_empty() {
            return Err(DatasetError::Unavailable(format!(
                "{} contains no records",
                self.path.display()
            )));
        }
        Ok(records)
    }
}

/// Writes records as JSON lines.
pub fn write_jsonl(path: impl AsRef<Path>, records: &[TrainingRecord]) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

const PROPERTY_TYPES: [&str; 4] = [
    "Residential Apartment",
    "Independent House/Villa",
    "Farm House",
    "Studio Apartment",
];

const CITIES: [&str; 5] = [
    "Mumbai Andheri-Dahisar",
    "Central Mumbai suburbs",
    "Navi Mumbai",
    "South Mumbai",
    "Thane",
];

// (locality, base price per sqft, historical growth rate)
const LOCALITIES: [(&str, f64, f64); 8] = [
    ("Andheri West", 12_000.0, 0.06),
    ("Bandra West", 20_000.0, 0.07),
    ("Powai", 15_000.0, 0.055),
    ("Goregaon East", 11_000.0, 0.05),
    ("Malad West", 10_000.0, 0.045),
    ("Thane West", 8_000.0, 0.04),
    ("Kharghar", 7_000.0, 0.065),
    ("Vashi", 9_000.0, 0.05),
];

const VILLA: &str = "Independent House/Villa";
const MIN_PRICE_PER_SQFT: f64 = 6_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Market,
    Fallback,
}

/// Deterministic generator of Mumbai-area training data.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    samples: usize,
    seed: u64,
    band: GrowthBand,
    shape: Shape,
}

impl SyntheticDataset {
    /// Market-shaped data: eight localities with their own price levels and
    /// appreciation rates.
    #[must_use]
    pub fn new(samples: usize, seed: u64) -> Self {
        Self {
            samples,
            seed,
            band: GrowthBand::default(),
            shape: Shape::Market,
        }
    }

    /// Minimal data used when regular training fails: two types, two
    /// cities, two localities and a noiseless price formula.
    #[must_use]
    pub fn fallback(samples: usize, seed: u64) -> Self {
        Self {
            shape: Shape::Fallback,
            ..Self::new(samples, seed)
        }
    }

    /// Clamps generated growth labels into `band`.
    #[must_use]
    pub fn with_band(mut self, band: GrowthBand) -> Self {
        self.band = band;
        self
    }

    /// Generates the records.
    #[must_use]
    pub fn generate(&self) -> Vec<TrainingRecord> {
        let mut rng = SmallRng::seed_from_u64(self.seed);
        (0..self.samples)
            .map(|_| match self.shape {
                Shape::Market => self.market_record(&mut rng),
                Shape::Fallback => fallback_record(&mut rng),
            })
            .collect()
    }

    fn market_record(&self, rng: &mut SmallRng) -> TrainingRecord {
        let property_type = *PROPERTY_TYPES.choose(rng).unwrap_or(&PROPERTY_TYPES[0]);
        let city = *CITIES.choose(rng).unwrap_or(&CITIES[0]);
        let (locality, base, growth) = *LOCALITIES.choose(rng).unwrap_or(&LOCALITIES[0]);
        let bedrooms: u32 = rng.gen_range(1..=5);
        let furnish = FurnishStatus::from_code(rng.gen_range(0..=2)).unwrap_or_default();
        let area = rng.gen_range(500.0..2000.0);
        let age: u32 = rng.gen_range(0..15);
        let latitude = rng.gen_range(19.0..19.3);
        let longitude = rng.gen_range(72.8..73.1);

        let villa_premium = if property_type == VILLA { 5_000.0 } else { 0.0 };
        let price = (base + 500.0 * f64::from(bedrooms) - 200.0 * f64::from(age)
            + villa_premium
            + gaussian(rng, 0.0, 1_000.0))
        .max(MIN_PRICE_PER_SQFT);
        let growth_rate = self.band.clamp(growth + gaussian(rng, 0.0, 0.01));

        TrainingRecord {
            property: PropertyRecord::new(property_type, city, locality, area)
                .with_bedrooms(bedrooms)
                .with_furnish(furnish)
                .with_age(age)
                .with_coordinates(latitude, longitude),
            price_per_unit_area: price,
            growth_rate: Some(growth_rate),
        }
    }
}

fn fallback_record(rng: &mut SmallRng) -> TrainingRecord {
    let property_type = if rng.gen_bool(0.5) {
        "Residential Apartment"
    } else {
        VILLA
    };
    let city = if rng.gen_bool(0.5) {
        "Mumbai Andheri-Dahisar"
    } else {
        "Thane"
    };
    let locality = if rng.gen_bool(0.5) {
        "Andheri West"
    } else {
        "Powai"
    };
    let bedrooms: u32 = rng.gen_range(1..=3);
    let furnish = if rng.gen_bool(0.5) {
        FurnishStatus::Unfurnished
    } else {
        FurnishStatus::Furnished
    };
    let area = rng.gen_range(500.0..1500.0);
    let age: u32 = rng.gen_range(0..10);

    let mut price = 15_000.0 + 500.0 * f64::from(bedrooms) - 200.0 * f64::from(age);
    if property_type == VILLA {
        price += 2_000.0;
    }
    if city == "Mumbai Andheri-Dahisar" {
        price += 1_000.0;
    }

    TrainingRecord {
        property: PropertyRecord::new(property_type, city, locality, area)
            .with_bedrooms(bedrooms)
            .with_furnish(furnish)
            .with_age(age),
        price_per_unit_area: price,
        growth_rate: Some(rng.gen_range(0.04..0.06)),
    }
}

// Box-Muller transform.
fn gaussian(rng: &mut SmallRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    mean + std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

impl DatasetSource for SyntheticDataset {
    fn label(&self) -> &str {
        match self.shape {
            Shape::Market => "synthetic",
            Shape::Fallback => "fallback",
        }
    }

    fn load(&self) -> Result<Vec<TrainingRecord>, DatasetError> {
        if self.samples == 0 {
            return Err(DatasetError::Unavailable(
                "synthetic dataset configured with zero samples".into(),
            ));
        }
        Ok(self.generate())
    }
}
