//! Geospatial enrichment: nearby listing statistics and hotspot premiums.
//!
//! Lookups are single-attempt and bounded by the configured timeout. Any
//! failure degrades to the defined fallback instead of reaching the caller.

/// POI categories and premium scoring.
pub mod hotspot;
/// External lookup seams and their HTTP/static implementations.
pub mod lookup;

use std::{future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::GeoSettings,
    telemetry::{emit, PricingTelemetry},
};

use hotspot::HotspotImpact;
use lookup::{
    HttpNearbyLookup, HttpPoiLookup, LookupError, NearbyPropertyLookup, PoiLookup,
    StaticPoiLookup,
};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// WGS84 point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
}

impl Coordinates {
    /// Creates a point.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in kilometres (haversine).
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * a.sqrt().min(1.0).asin() * EARTH_RADIUS_KM
    }
}

/// Listing density and price level around a property.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyStats {
    /// Listings found.
    pub count: usize,
    /// Mean price per square foot of listings that carry one.
    pub mean_price_per_unit_area: Option<f64>,
    /// Whether the values are the configured defaults.
    pub defaulted: bool,
}

/// Runs the nearby and POI lookups for a prediction.
pub struct GeoEnricher {
    nearby: Option<Arc<dyn NearbyPropertyLookup>>,
    pois: Option<Arc<dyn PoiLookup>>,
    settings: GeoSettings,
    telemetry: Option<PricingTelemetry>,
}

impl std::fmt::Debug for GeoEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoEnricher")
            .field("nearby", &self.nearby.is_some())
            .field("pois", &self.pois.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GeoEnricher {
    /// Enricher without any lookup; every request gets the defaults.
    #[must_use]
    pub const fn new(settings: GeoSettings) -> Self {
        Self {
            nearby: None,
            pois: None,
            settings,
            telemetry: None,
        }
    }

    /// Wires lookups from the `[geo]` configuration section.
    pub fn from_settings(settings: &GeoSettings) -> Result<Self, LookupError> {
        let mut enricher = Self::new(settings.clone());
        if let Some(url) = &settings.nearby_url {
            enricher = enricher.with_nearby(Arc::new(HttpNearbyLookup::new(
                url.clone(),
                settings.timeout(),
            )?));
        }
        if let Some(url) = &settings.poi_url {
            enricher =
                enricher.with_pois(Arc::new(HttpPoiLookup::new(url.clone(), settings.timeout())?));
        } else if settings.builtin_pois {
            enricher = enricher.with_pois(Arc::new(StaticPoiLookup::mumbai()));
        }
        Ok(enricher)
    }

    /// Sets the nearby-properties lookup.
    #[must_use]
    pub fn with_nearby(mut self, lookup: Arc<dyn NearbyPropertyLookup>) -> Self {
        self.nearby = Some(lookup);
        self
    }

    /// Sets the POI lookup.
    #[must_use]
    pub fn with_pois(mut self, lookup: Arc<dyn PoiLookup>) -> Self {
        self.pois = Some(lookup);
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Option<PricingTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &GeoSettings {
        &self.settings
    }

    fn default_stats(&self) -> NearbyStats {
        NearbyStats {
            count: self.settings.default_nearby_count,
            mean_price_per_unit_area: Some(self.settings.default_mean_price),
            defaulted: true,
        }
    }

    /// Nearby statistics; defaults when coordinates are absent or the lookup
    /// fails.
    pub async fn nearby_stats(&self, at: Option<Coordinates>) -> NearbyStats {
        let Some(at) = at else {
            return self.default_stats();
        };
        let result = match &self.nearby {
            Some(lookup) => {
                bounded(
                    self.settings.timeout(),
                    lookup.query(at, self.settings.radius_km),
                )
                .await
            }
            None => Err(LookupError::Unconfigured),
        };
        match result {
            Ok(properties) => {
                let prices: Vec<f64> = properties
                    .iter()
                    .filter_map(|p| p.price_per_unit_area)
                    .filter(|price| price.is_finite() && *price > 0.0)
                    .collect();
                let mean = if prices.is_empty() {
                    None
                } else {
                    Some(prices.iter().sum::<f64>() / prices.len() as f64)
                };
                emit(
                    self.telemetry.as_ref(),
                    LogLevel::Debug,
                    "pricing.geo.nearby.fetched",
                    json!({ "count": properties.len(), "priced": prices.len() }),
                );
                NearbyStats {
                    count: properties.len(),
                    mean_price_per_unit_area: mean,
                    defaulted: false,
                }
            }
            Err(err) => {
                emit(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "pricing.geo.nearby.degraded",
                    json!({ "error": err.to_string() }),
                );
                self.default_stats()
            }
        }
    }

    /// Hotspot premium; `None` when coordinates are absent or no POI data
    /// could be obtained.
    pub async fn hotspot_impact(&self, at: Option<Coordinates>) -> Option<HotspotImpact> {
        let at = at?;
        let Some(lookup) = &self.pois else {
            emit(
                self.telemetry.as_ref(),
                LogLevel::Debug,
                "pricing.geo.hotspot.unconfigured",
                json!({}),
            );
            return None;
        };
        match bounded(
            self.settings.timeout(),
            lookup.query(at, self.settings.radius_km),
        )
        .await
        {
            Ok(pois) => {
                let impact = HotspotImpact::score(&pois, self.settings.hotspot_cap);
                emit(
                    self.telemetry.as_ref(),
                    LogLevel::Debug,
                    "pricing.geo.hotspot.scored",
                    json!({
                        "pois": pois.len(),
                        "total": impact.total_impact,
                        "uncapped": impact.uncapped_impact,
                    }),
                );
                Some(impact)
            }
            Err(err) => {
                emit(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "pricing.geo.hotspot.degraded",
                    json!({ "error": err.to_string() }),
                );
                None
            }
        }
    }

    /// Runs both lookups concurrently.
    pub async fn enrich(&self, at: Option<Coordinates>) -> (NearbyStats, Option<HotspotImpact>) {
        tokio::join!(self.nearby_stats(at), self.hotspot_impact(at))
    }
}

async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, LookupError>
where
    F: Future<Output = Result<T, LookupError>>,
{
    tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
        Err(LookupError::Timeout(
            u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        ))
    })
}
