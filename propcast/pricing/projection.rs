use serde::{Deserialize, Serialize};

use crate::error::PricingError;

/// Forecast for one future calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyProjection {
    /// Calendar year.
    pub year: i32,
    /// Projected total price.
    pub price: f64,
    /// Projected price per square foot.
    pub price_per_unit_area: f64,
    /// Growth rate applied, in percent.
    pub growth_rate_percent: f64,
}

impl YearlyProjection {
    /// Copy with monetary values and the rate rounded to two decimals.
    #[must_use]
    pub fn rounded(self) -> Self {
        Self {
            year: self.year,
            price: round2(self.price),
            price_per_unit_area: round2(self.price_per_unit_area),
            growth_rate_percent: round2(self.growth_rate_percent),
        }
    }
}

/// Compounds `base_price` yearly for `years` years starting the year after
/// `current_year`.
pub fn project(
    base_price: f64,
    area_sqft: f64,
    growth_rate: f64,
    years: u32,
    current_year: i32,
) -> Result<Vec<YearlyProjection>, PricingError> {
    if years == 0 {
        return Err(PricingError::invalid("years must be a positive integer"));
    }
    if !area_sqft.is_finite() || area_sqft <= 0.0 {
        return Err(PricingError::invalid("areaSqft must be positive"));
    }
    if !base_price.is_finite() || !growth_rate.is_finite() {
        return Err(PricingError::Internal(format!(
            "projection inputs must be finite (base {base_price}, rate {growth_rate})"
        )));
    }
    let offset = i32::try_from(years)
        .map_err(|_| PricingError::invalid(format!("years {years} is too large")))?;
    let last_year = current_year
        .checked_add(offset)
        .ok_or_else(|| PricingError::invalid(format!("years {years} is too large")))?;

    let factor = 1.0 + growth_rate;
    let mut price = base_price;
    (current_year + 1..=last_year)
        .map(|year| {
            price *= factor;
            let row = YearlyProjection {
                year,
                price,
                price_per_unit_area: price / area_sqft,
                growth_rate_percent: growth_rate * 100.0,
            };
            if row.price.is_finite() && row.price_per_unit_area.is_finite() {
                Ok(row)
            } else {
                Err(PricingError::Internal(format!(
                    "projected price for {year} is not finite"
                )))
            }
        })
        .collect()
}

/// Rounds half away from zero to two decimals.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compounds_each_year() {
        let rows = project(1_000_000.0, 1_000.0, 0.05, 3, 2026).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows.iter().map(|r| r.year).collect::<Vec<_>>(),
            [2027, 2028, 2029]
        );
        assert!((rows[0].price - 1_050_000.0).abs() < 1e-6);
        assert!((rows[2].price - 1_000_000.0 * 1.05f64.powi(3)).abs() < 1e-6);
        assert!((rows[1].price_per_unit_area - rows[1].price / 1_000.0).abs() < 1e-9);
        assert!(rows.windows(2).all(|w| w[1].price > w[0].price));
        assert!((rows[0].growth_rate_percent - 5.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_zero_years_and_bad_area() {
        assert!(project(1.0, 1.0, 0.05, 0, 2026).is_err());
        assert!(project(1.0, 0.0, 0.05, 1, 2026).is_err());
        assert!(project(f64::NAN, 1.0, 0.05, 1, 2026).is_err());
    }

    #[test]
    fn overflowing_horizon_is_an_error() {
        let err = project(1.0e300, 1.0, 0.10, 8_000, 2026).unwrap_err();
        assert!(matches!(err, PricingError::Internal(_)));
        assert!(project(1.0e6, 900.0, 0.10, 200, 2026).is_ok());
    }

    #[test]
    fn rounding_keeps_two_decimals() {
        let row = YearlyProjection {
            year: 2030,
            price: 1_234.567,
            price_per_unit_area: 1.005,
            growth_rate_percent: 5.4999,
        }
        .rounded();
        assert_eq!(row.price, 1_234.57);
        assert_eq!(row.growth_rate_percent, 5.5);
        assert_eq!(round2(-2.345_6), -2.35);
    }
}
