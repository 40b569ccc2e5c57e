use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::GrowthBand,
    encoder::{EncodedFeatureVector, FeatureEncoder},
    error::PricingError,
    models::{RegressionModel, TrainingReport},
    record::PropertyRecord,
};

/// How a bundle's parameters were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleOrigin {
    /// Fitted on real or synthetic market data.
    Trained,
    /// Fitted on the minimal fallback dataset.
    Fallback,
}

/// Where a growth rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthSource {
    /// Predicted by the bundle's growth model.
    Model,
    /// The bundle's fixed fallback rate.
    Fallback,
}

/// Immutable unit of deployment: encoder plus fitted models.
///
/// A bundle is never mutated after construction; retraining produces a new
/// bundle with a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBundle {
    id: Uuid,
    created_at: DateTime<Utc>,
    origin: BundleOrigin,
    encoder: FeatureEncoder,
    price_model: RegressionModel,
    #[serde(default)]
    growth_model: Option<RegressionModel>,
    fallback_growth_rate: f64,
    #[serde(default)]
    report: Option<TrainingReport>,
}

impl ModelBundle {
    /// Assembles and validates a bundle.
    pub fn new(
        origin: BundleOrigin,
        encoder: FeatureEncoder,
        price_model: RegressionModel,
        growth_model: Option<RegressionModel>,
        fallback_growth_rate: f64,
        report: Option<TrainingReport>,
    ) -> Result<Self, PricingError> {
        let bundle = Self::assemble(
            origin,
            encoder,
            price_model,
            growth_model,
            fallback_growth_rate,
            report,
        );
        bundle.validate()?;
        Ok(bundle)
    }

    pub(crate) fn assemble(
        origin: BundleOrigin,
        encoder: FeatureEncoder,
        price_model: RegressionModel,
        growth_model: Option<RegressionModel>,
        fallback_growth_rate: f64,
        report: Option<TrainingReport>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            origin,
            encoder,
            price_model,
            growth_model,
            fallback_growth_rate,
            report,
        }
    }

    /// Checks that every model agrees with the encoder's column layout.
    pub fn validate(&self) -> Result<(), PricingError> {
        self.encoder.check_consistency()?;
        let width = self.encoder.width();
        for model in std::iter::once(&self.price_model).chain(self.growth_model.as_ref()) {
            if model.n_features() != width {
                return Err(PricingError::ColumnMismatch {
                    expected: width,
                    actual: model.n_features(),
                });
            }
            if !model.is_well_formed() {
                return Err(PricingError::Internal(format!(
                    "{} model parameters are malformed",
                    model.name()
                )));
            }
        }
        if !self.fallback_growth_rate.is_finite() {
            return Err(PricingError::Internal(
                "fallback growth rate must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Encodes a record with this bundle's encoder.
    #[must_use]
    pub fn encode(&self, record: &PropertyRecord) -> EncodedFeatureVector {
        self.encoder.encode(record)
    }

    /// Raw price-per-square-foot prediction.
    pub fn predict_price_per_unit_area(
        &self,
        features: &EncodedFeatureVector,
    ) -> Result<f64, PricingError> {
        self.price_model.predict(features)
    }

    /// Growth rate clamped into `band`, falling back to the bundle's fixed
    /// rate when there is no growth model.
    pub fn predict_growth_rate(
        &self,
        features: &EncodedFeatureVector,
        band: &GrowthBand,
    ) -> Result<(f64, GrowthSource), PricingError> {
        match &self.growth_model {
            Some(model) => Ok((band.clamp(model.predict(features)?), GrowthSource::Model)),
            None => Ok((band.clamp(self.fallback_growth_rate), GrowthSource::Fallback)),
        }
    }

    /// Unique bundle id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// How the bundle was produced.
    #[must_use]
    pub const fn origin(&self) -> BundleOrigin {
        self.origin
    }

    /// Fitted encoder.
    #[must_use]
    pub const fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    /// Price model.
    #[must_use]
    pub const fn price_model(&self) -> &RegressionModel {
        &self.price_model
    }

    /// Growth-rate model, if one was trained.
    #[must_use]
    pub const fn growth_model(&self) -> Option<&RegressionModel> {
        self.growth_model.as_ref()
    }

    /// Rate used without a growth model.
    #[must_use]
    pub const fn fallback_growth_rate(&self) -> f64 {
        self.fallback_growth_rate
    }

    /// Training report, when the bundle was trained in this process or the
    /// report was persisted with it.
    #[must_use]
    pub const fn report(&self) -> Option<&TrainingReport> {
        self.report.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::TrainingRecord;

    pub(crate) fn constant_bundle(price: f64, growth: Option<f64>) -> ModelBundle {
        let records = vec![
            PropertyRecord::new("Residential Apartment", "Thane", "Thane West", 900.0),
            PropertyRecord::new("Independent House/Villa", "Navi Mumbai", "Kharghar", 1500.0),
        ];
        let encoder = FeatureEncoder::fit(&records).unwrap();
        let width = encoder.width();
        ModelBundle::new(
            BundleOrigin::Trained,
            encoder,
            RegressionModel::Constant {
                value: price,
                n_features: width,
            },
            growth.map(|value| RegressionModel::Constant {
                value,
                n_features: width,
            }),
            0.05,
            None,
        )
        .unwrap()
    }

    #[test]
    fn growth_is_clamped_into_band() {
        let band = GrowthBand::default();
        let record = PropertyRecord::new("Residential Apartment", "Thane", "Thane West", 900.0);

        let wild = constant_bundle(10_000.0, Some(0.4));
        let features = wild.encode(&record);
        assert_eq!(
            wild.predict_growth_rate(&features, &band).unwrap(),
            (0.10, GrowthSource::Model)
        );

        let negative = constant_bundle(10_000.0, Some(-0.3));
        assert_eq!(negative.predict_growth_rate(&features, &band).unwrap().0, 0.02);

        let none = constant_bundle(10_000.0, None);
        assert_eq!(
            none.predict_growth_rate(&features, &band).unwrap(),
            (0.05, GrowthSource::Fallback)
        );
    }

    #[test]
    fn rejects_models_of_the_wrong_width() {
        let records = vec![TrainingRecord {
            property: PropertyRecord::new("Residential Apartment", "Thane", "Thane West", 900.0),
            price_per_unit_area: 9_000.0,
            growth_rate: None,
        }];
        let encoder =
            FeatureEncoder::fit(records.iter().map(|record| &record.property)).unwrap();
        let narrow = RegressionModel::Constant {
            value: 1.0,
            n_features: 1,
        };
        let err = ModelBundle::new(BundleOrigin::Trained, encoder, narrow, None, 0.05, None)
            .unwrap_err();
        assert!(matches!(err, PricingError::ColumnMismatch { .. }));
    }

    #[test]
    fn predicts_price_for_unknown_categories() {
        let bundle = constant_bundle(12_345.0, None);
        let unseen = PropertyRecord::new("Penthouse", "Pune", "Baner", 3000.0);
        let features = bundle.encode(&unseen);
        assert_eq!(bundle.predict_price_per_unit_area(&features).unwrap(), 12_345.0);
        assert_eq!(bundle.encoder().width(), features.len());
    }
}
