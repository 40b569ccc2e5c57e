use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::PricingError, geo::Coordinates};

/// Furnishing state of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "FurnishRepr", rename_all = "kebab-case")]
pub enum FurnishStatus {
    /// No furniture.
    #[default]
    Unfurnished,
    /// Fully furnished.
    Furnished,
    /// Partially furnished.
    SemiFurnished,
}

impl FurnishStatus {
    /// Ordinal code used as the numeric feature.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Unfurnished => 0,
            Self::Furnished => 1,
            Self::SemiFurnished => 2,
        }
    }

    /// Inverse of [`FurnishStatus::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unfurnished),
            1 => Some(Self::Furnished),
            2 => Some(Self::SemiFurnished),
            _ => None,
        }
    }
}

impl fmt::Display for FurnishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unfurnished => "unfurnished",
            Self::Furnished => "furnished",
            Self::SemiFurnished => "semi-furnished",
        })
    }
}

// Clients send either the label or the legacy integer code.
#[derive(Deserialize)]
#[serde(untagged)]
enum FurnishRepr {
    Code(u8),
    Label(String),
}

impl TryFrom<FurnishRepr> for FurnishStatus {
    type Error = String;

    fn try_from(value: FurnishRepr) -> Result<Self, Self::Error> {
        match value {
            FurnishRepr::Code(code) => {
                Self::from_code(code).ok_or_else(|| format!("unknown furnish code {code}"))
            }
            FurnishRepr::Label(label) => {
                match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
                    "unfurnished" => Ok(Self::Unfurnished),
                    "furnished" => Ok(Self::Furnished),
                    "semi-furnished" | "semifurnished" => Ok(Self::SemiFurnished),
                    other => Err(format!("unknown furnish status '{other}'")),
                }
            }
        }
    }
}

/// Property submitted for a price prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    /// Property type, e.g. `Residential Apartment`.
    pub property_type: String,
    /// City or city zone.
    pub city: String,
    /// Locality within the city.
    pub locality: String,
    /// Number of bedrooms; null is treated as zero.
    #[serde(default, alias = "bedroomNum")]
    pub bedroom_count: Option<u32>,
    /// Furnishing state.
    #[serde(default)]
    pub furnish_status: FurnishStatus,
    /// Built-up area in square feet.
    #[serde(alias = "area")]
    pub area_sqft: f64,
    /// Age of the building in years.
    #[serde(default, alias = "age")]
    pub age_years: u32,
    /// Latitude in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl PropertyRecord {
    /// Creates a record without coordinates.
    #[must_use]
    pub fn new(
        property_type: impl Into<String>,
        city: impl Into<String>,
        locality: impl Into<String>,
        area_sqft: f64,
    ) -> Self {
        Self {
            property_type: property_type.into(),
            city: city.into(),
            locality: locality.into(),
            bedroom_count: None,
            furnish_status: FurnishStatus::Unfurnished,
            area_sqft,
            age_years: 0,
            latitude: None,
            longitude: None,
        }
    }

    /// Sets the bedroom count.
    #[must_use]
    pub fn with_bedrooms(mut self, bedrooms: u32) -> Self {
        self.bedroom_count = Some(bedrooms);
        self
    }

    /// Sets the furnishing state.
    #[must_use]
    pub fn with_furnish(mut self, status: FurnishStatus) -> Self {
        self.furnish_status = status;
        self
    }

    /// Sets the building age.
    #[must_use]
    pub fn with_age(mut self, age_years: u32) -> Self {
        self.age_years = age_years;
        self
    }

    /// Sets both coordinates.
    #[must_use]
    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Bedroom count with null mapped to zero.
    #[must_use]
    pub fn bedrooms(&self) -> u32 {
        self.bedroom_count.unwrap_or(0)
    }

    /// Coordinates, present only when both latitude and longitude are set.
    #[must_use]
    pub const fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    /// Checks required fields and ranges.
    pub fn validate(&self) -> Result<(), PricingError> {
        for (field, value) in [
            ("propertyType", &self.property_type),
            ("city", &self.city),
            ("locality", &self.locality),
        ] {
            if value.trim().is_empty() {
                return Err(PricingError::invalid(format!("{field} must not be empty")));
            }
        }
        if !self.area_sqft.is_finite() || self.area_sqft <= 0.0 {
            return Err(PricingError::invalid(format!(
                "areaSqft must be a positive number, got {}",
                self.area_sqft
            )));
        }
        if let Some(lat) = self.latitude {
            if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                return Err(PricingError::invalid(format!("latitude {lat} out of range")));
            }
        }
        if let Some(lng) = self.longitude {
            if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
                return Err(PricingError::invalid(format!("longitude {lng} out of range")));
            }
        }
        Ok(())
    }
}

/// Labelled record used to fit a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingRecord {
    /// Property attributes.
    #[serde(flatten)]
    pub property: PropertyRecord,
    /// Observed price per square foot.
    #[serde(alias = "pricePerSqft")]
    pub price_per_unit_area: f64,
    /// Observed or synthesized annual appreciation fraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth_rate: Option<f64>,
}

impl TrainingRecord {
    /// Checks the property fields and the labels.
    pub fn validate(&self) -> Result<(), PricingError> {
        self.property.validate()?;
        if !self.price_per_unit_area.is_finite() || self.price_per_unit_area <= 0.0 {
            return Err(PricingError::invalid(format!(
                "pricePerUnitArea must be positive, got {}",
                self.price_per_unit_area
            )));
        }
        if let Some(rate) = self.growth_rate {
            if !rate.is_finite() {
                return Err(PricingError::invalid("growthRate must be finite"));
            }
        }
        Ok(())
    }
}

/// Request envelope: a property plus the projection horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    /// Property to price.
    #[serde(flatten)]
    pub record: PropertyRecord,
    /// Number of future years to project.
    #[serde(default = "default_years")]
    pub years: u32,
}

const fn default_years() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_legacy_payload_names() {
        let request: PredictionRequest = serde_json::from_value(json!({
            "propertyType": "Residential Apartment",
            "city": "Thane",
            "locality": "Thane West",
            "bedroomNum": null,
            "furnishStatus": 2,
            "area": 900.0,
            "age": 3
        }))
        .unwrap();
        assert_eq!(request.years, 5);
        assert_eq!(request.record.bedrooms(), 0);
        assert_eq!(request.record.furnish_status, FurnishStatus::SemiFurnished);
        assert_eq!(request.record.age_years, 3);
        assert!(request.record.coordinates().is_none());
    }

    #[test]
    fn parses_furnish_labels() {
        let record: PropertyRecord = serde_json::from_value(json!({
            "propertyType": "Studio Apartment",
            "city": "Navi Mumbai",
            "locality": "Vashi",
            "furnishStatus": "Semi_Furnished",
            "areaSqft": 450.0
        }))
        .unwrap();
        assert_eq!(record.furnish_status, FurnishStatus::SemiFurnished);
        assert!(serde_json::from_value::<PropertyRecord>(json!({
            "propertyType": "Studio Apartment",
            "city": "Navi Mumbai",
            "locality": "Vashi",
            "furnishStatus": 7,
            "areaSqft": 450.0
        }))
        .is_err());
    }

    #[test]
    fn lone_coordinate_is_absent() {
        let mut record = PropertyRecord::new("Residential Apartment", "Thane", "Thane West", 900.0);
        record.latitude = Some(19.2);
        assert!(record.coordinates().is_none());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_records() {
        let record = PropertyRecord::new("Residential Apartment", "Thane", "Thane West", 0.0);
        assert!(record.validate().is_err());
        let record = PropertyRecord::new("", "Thane", "Thane West", 900.0);
        assert!(record.validate().is_err());
        let record = PropertyRecord::new("Residential Apartment", "Thane", "Thane West", 900.0)
            .with_coordinates(120.0, 72.8);
        assert!(record.validate().is_err());
    }

    #[test]
    fn training_record_requires_positive_price() {
        let record = TrainingRecord {
            property: PropertyRecord::new("Residential Apartment", "Thane", "Thane West", 900.0),
            price_per_unit_area: -1.0,
            growth_rate: Some(0.05),
        };
        assert!(record.validate().is_err());
    }
}
