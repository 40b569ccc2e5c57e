//! Maps property records onto fixed-width numeric vectors.
//!
//! The layout is a one-hot block per categorical field (vocabulary sorted at
//! fit time) followed by one standardized column per numeric field. Values
//! unseen at fit time encode as an all-zero block.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{error::PricingError, record::PropertyRecord};

/// Categorical fields, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CategoricalField {
    /// `propertyType`.
    PropertyType,
    /// `city`.
    City,
    /// `locality`.
    Locality,
}

impl CategoricalField {
    /// All categorical fields in encoding order.
    pub const ALL: [Self; 3] = [Self::PropertyType, Self::City, Self::Locality];

    /// Wire name of the field.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PropertyType => "propertyType",
            Self::City => "city",
            Self::Locality => "locality",
        }
    }

    fn value(self, record: &PropertyRecord) -> &str {
        match self {
            Self::PropertyType => record.property_type.trim(),
            Self::City => record.city.trim(),
            Self::Locality => record.locality.trim(),
        }
    }
}

/// Numeric fields, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NumericField {
    /// `bedroomCount` (null counts as zero).
    BedroomCount,
    /// Ordinal furnishing code.
    FurnishStatus,
    /// `areaSqft`.
    AreaSqft,
    /// `ageYears` (defaults to zero).
    AgeYears,
}

impl NumericField {
    /// All numeric fields in encoding order.
    pub const ALL: [Self; 4] = [
        Self::BedroomCount,
        Self::FurnishStatus,
        Self::AreaSqft,
        Self::AgeYears,
    ];

    /// Wire name of the field.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BedroomCount => "bedroomCount",
            Self::FurnishStatus => "furnishStatus",
            Self::AreaSqft => "areaSqft",
            Self::AgeYears => "ageYears",
        }
    }

    fn value(self, record: &PropertyRecord) -> f64 {
        match self {
            Self::BedroomCount => f64::from(record.bedrooms()),
            Self::FurnishStatus => f64::from(record.furnish_status.code()),
            Self::AreaSqft => record.area_sqft,
            Self::AgeYears => f64::from(record.age_years),
        }
    }
}

/// Vocabulary learned for one categorical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryVocabulary {
    /// Field the vocabulary belongs to.
    pub field: CategoricalField,
    /// Sorted, de-duplicated categories.
    pub categories: Vec<String>,
}

impl CategoryVocabulary {
    fn position(&self, value: &str) -> Option<usize> {
        self.categories
            .binary_search_by(|candidate| candidate.as_str().cmp(value))
            .ok()
    }
}

/// Training-time statistics for one numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericScale {
    /// Field the statistics belong to.
    pub field: NumericField,
    /// Population mean.
    pub mean: f64,
    /// Population standard deviation (1.0 when the column is constant).
    pub std: f64,
}

impl NumericScale {
    fn standardize(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }
}

/// Encoded property, ready for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedFeatureVector(Vec<f64>);

impl EncodedFeatureVector {
    /// Vector width.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Column values.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Fitted encoder: vocabularies, scaler statistics, and column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    vocabularies: Vec<CategoryVocabulary>,
    scales: Vec<NumericScale>,
    columns: Vec<String>,
}

impl FeatureEncoder {
    /// Learns vocabularies and scaler statistics from property records.
    pub fn fit<'a, I>(records: I) -> Result<Self, PricingError>
    where
        I: IntoIterator<Item = &'a PropertyRecord>,
    {
        let records: Vec<&PropertyRecord> = records.into_iter().collect();
        if records.is_empty() {
            return Err(PricingError::Training(
                "cannot fit encoder on an empty dataset".into(),
            ));
        }

        let vocabularies = CategoricalField::ALL
            .iter()
            .map(|&field| {
                let mut categories: Vec<String> = records
                    .iter()
                    .map(|record| field.value(record).to_string())
                    .collect();
                categories.sort_unstable();
                categories.dedup();
                CategoryVocabulary { field, categories }
            })
            .collect::<Vec<_>>();

        let count = records.len() as f64;
        let scales = NumericField::ALL
            .iter()
            .map(|&field| {
                let mean = records.iter().map(|r| field.value(r)).sum::<f64>() / count;
                let variance = records
                    .iter()
                    .map(|r| (field.value(r) - mean).powi(2))
                    .sum::<f64>()
                    / count;
                let std = variance.sqrt();
                NumericScale {
                    field,
                    mean,
                    std: if std.is_finite() && std > 1e-12 { std } else { 1.0 },
                }
            })
            .collect::<Vec<_>>();

        let mut columns = Vec::new();
        for vocabulary in &vocabularies {
            for category in &vocabulary.categories {
                columns.push(format!("{}={}", vocabulary.field.name(), category));
            }
        }
        columns.extend(scales.iter().map(|scale| scale.field.name().to_string()));

        Ok(Self {
            vocabularies,
            scales,
            columns,
        })
    }

    /// Layout with empty vocabularies and identity scaling: numeric columns
    /// only.
    pub(crate) fn empty() -> Self {
        let scales: Vec<NumericScale> = NumericField::ALL
            .iter()
            .map(|&field| NumericScale {
                field,
                mean: 0.0,
                std: 1.0,
            })
            .collect();
        Self {
            vocabularies: CategoricalField::ALL
                .iter()
                .map(|&field| CategoryVocabulary {
                    field,
                    categories: Vec::new(),
                })
                .collect(),
            columns: scales.iter().map(|s| s.field.name().to_string()).collect(),
            scales,
        }
    }

    /// Encodes a single record. Pure: the same record always yields the
    /// same vector for a given encoder.
    #[must_use]
    pub fn encode(&self, record: &PropertyRecord) -> EncodedFeatureVector {
        let mut values = vec![0.0; self.columns.len()];
        self.write_row(record, &mut values);
        EncodedFeatureVector(values)
    }

    /// Encodes many records into a row-major matrix.
    #[must_use]
    pub fn encode_batch<'a, I>(&self, records: I) -> Array2<f64>
    where
        I: IntoIterator<Item = &'a PropertyRecord>,
    {
        let records: Vec<&PropertyRecord> = records.into_iter().collect();
        let mut matrix = Array2::zeros((records.len(), self.width()));
        for (mut row, record) in matrix.rows_mut().into_iter().zip(records) {
            if let Some(slice) = row.as_slice_mut() {
                self.write_row(record, slice);
            } else {
                let encoded = self.encode(record);
                for (cell, value) in row.iter_mut().zip(encoded.as_slice()) {
                    *cell = *value;
                }
            }
        }
        matrix
    }

    fn write_row(&self, record: &PropertyRecord, out: &mut [f64]) {
        let mut offset = 0;
        for vocabulary in &self.vocabularies {
            if let Some(position) = vocabulary.position(vocabulary.field.value(record)) {
                out[offset + position] = 1.0;
            }
            offset += vocabulary.categories.len();
        }
        for scale in &self.scales {
            out[offset] = scale.standardize(scale.field.value(record));
            offset += 1;
        }
    }

    /// Number of encoded columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column names in encoding order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Learned categorical vocabularies.
    #[must_use]
    pub fn vocabularies(&self) -> &[CategoryVocabulary] {
        &self.vocabularies
    }

    /// Learned numeric statistics.
    #[must_use]
    pub fn scales(&self) -> &[NumericScale] {
        &self.scales
    }

    /// Checks that the stored column order agrees with the vocabularies and
    /// scales. Used when loading a persisted bundle.
    pub fn check_consistency(&self) -> Result<(), PricingError> {
        let expected = self
            .vocabularies
            .iter()
            .map(|v| v.categories.len())
            .sum::<usize>()
            + self.scales.len();
        if expected != self.columns.len() {
            return Err(PricingError::ColumnMismatch {
                expected,
                actual: self.columns.len(),
            });
        }
        let fields_match = self.vocabularies.len() == CategoricalField::ALL.len()
            && self
                .vocabularies
                .iter()
                .zip(CategoricalField::ALL)
                .all(|(v, field)| v.field == field)
            && self.scales.len() == NumericField::ALL.len()
            && self
                .scales
                .iter()
                .zip(NumericField::ALL)
                .all(|(s, field)| s.field == field);
        let sorted = self
            .vocabularies
            .iter()
            .all(|v| v.categories.windows(2).all(|pair| pair[0] < pair[1]));
        let scales_valid = self
            .scales
            .iter()
            .all(|s| s.mean.is_finite() && s.std.is_finite() && s.std > 0.0);
        if fields_match && sorted && scales_valid {
            Ok(())
        } else {
            Err(PricingError::Internal(
                "encoder fields, vocabulary order, or scales are inconsistent".into(),
            ))
        }
    }
}
