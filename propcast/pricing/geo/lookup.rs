use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    hotspot::{PoiCategory, PointOfInterest},
    Coordinates,
};

/// Failure of an external geospatial lookup.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Connection or protocol failure.
    #[error("lookup transport failed: {0}")]
    Transport(String),
    /// Service answered with a non-success HTTP status.
    #[error("lookup returned status {0}")]
    Status(u16),
    /// Service answered with an unusable body.
    #[error("lookup payload rejected: {0}")]
    Payload(String),
    /// No answer within the deadline (milliseconds).
    #[error("lookup timed out after {0} ms")]
    Timeout(u64),
    /// No service is configured for this lookup.
    #[error("lookup service not configured")]
    Unconfigured,
}

impl LookupError {
    fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_decode() {
            Self::Payload(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// One listing returned by the nearby-properties service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyProperty {
    /// Listed price per square foot.
    #[serde(default)]
    pub price_per_unit_area: Option<f64>,
    /// Listing latitude.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Listing longitude.
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Source of listings around a point.
#[async_trait]
pub trait NearbyPropertyLookup: Send + Sync {
    /// Listings within `radius_km` of `at`.
    async fn query(&self, at: Coordinates, radius_km: f64)
        -> Result<Vec<NearbyProperty>, LookupError>;
}

/// Source of points of interest around a point.
#[async_trait]
pub trait PoiLookup: Send + Sync {
    /// Recognised POIs within `radius_km` of `at`, nearest first.
    async fn query(&self, at: Coordinates, radius_km: f64)
        -> Result<Vec<PointOfInterest>, LookupError>;
}

fn build_client(timeout: Duration) -> Result<Client, LookupError> {
    Client::builder()
        .user_agent("propcast-pricing/0.1")
        .timeout(timeout)
        .build()
        .map_err(|err| LookupError::Transport(err.to_string()))
}

#[derive(Deserialize)]
struct NearbyEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    properties: Vec<NearbyProperty>,
}

/// Nearby-properties service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpNearbyLookup {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpNearbyLookup {
    /// Creates a lookup against `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl NearbyPropertyLookup for HttpNearbyLookup {
    async fn query(
        &self,
        at: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<NearbyProperty>, LookupError> {
        let envelope = self
            .client
            .get(&self.url)
            .query(&[
                ("lat", at.latitude),
                ("lng", at.longitude),
                ("radius", radius_km),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| LookupError::from_reqwest(&err, self.timeout))?
            .json::<NearbyEnvelope>()
            .await
            .map_err(|err| LookupError::from_reqwest(&err, self.timeout))?;
        if !envelope.success {
            return Err(LookupError::Payload(
                "nearby service reported success=false".into(),
            ));
        }
        Ok(envelope.properties)
    }
}

#[derive(Deserialize)]
struct PoiEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    pois: Vec<RawPoi>,
}

#[derive(Deserialize)]
struct RawPoi {
    name: String,
    #[serde(default)]
    types: Vec<String>,
    lat: f64,
    lng: f64,
    #[serde(default)]
    distance: Option<f64>,
}

/// POI service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPoiLookup {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpPoiLookup {
    /// Creates a lookup against `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl PoiLookup for HttpPoiLookup {
    async fn query(
        &self,
        at: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<PointOfInterest>, LookupError> {
        let types = PoiCategory::ALL
            .iter()
            .map(|category| category.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let envelope = self
            .client
            .get(&self.url)
            .query(&[
                ("lat", at.latitude.to_string()),
                ("lng", at.longitude.to_string()),
                ("radius", radius_km.to_string()),
                ("types", types),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| LookupError::from_reqwest(&err, self.timeout))?
            .json::<PoiEnvelope>()
            .await
            .map_err(|err| LookupError::from_reqwest(&err, self.timeout))?;
        if !envelope.success {
            return Err(LookupError::Payload(
                "poi service reported success=false".into(),
            ));
        }
        let pois = envelope
            .pois
            .into_iter()
            .filter_map(|raw| {
                let category = raw.types.iter().find_map(|t| PoiCategory::parse(t))?;
                let location = Coordinates::new(raw.lat, raw.lng);
                let distance_km = raw
                    .distance
                    .filter(|d| d.is_finite() && *d >= 0.0)
                    .unwrap_or_else(|| at.distance_km(&location));
                Some(PointOfInterest {
                    name: raw.name,
                    category,
                    distance_km,
                })
            })
            .collect();
        Ok(nearest_unique(pois))
    }
}

/// Sorts by distance and keeps the nearest entry for each name.
#[must_use]
pub fn nearest_unique(mut pois: Vec<PointOfInterest>) -> Vec<PointOfInterest> {
    pois.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    let mut seen = std::collections::HashSet::new();
    pois.retain(|poi| seen.insert(poi.name.clone()));
    pois
}

/// A catalogued POI with a fixed location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CataloguedPoi {
    /// Display name.
    pub name: String,
    /// Category.
    pub category: PoiCategory,
    /// Location.
    pub location: Coordinates,
}

/// In-process POI catalogue used when no POI service is configured.
#[derive(Debug, Clone, Default)]
pub struct StaticPoiLookup {
    entries: Vec<CataloguedPoi>,
}

impl StaticPoiLookup {
    /// Creates a lookup over the given entries.
    #[must_use]
    pub fn new(entries: Vec<CataloguedPoi>) -> Self {
        Self { entries }
    }

    /// Built-in catalogue around Andheri, Mumbai.
    #[must_use]
    pub fn mumbai() -> Self {
        let entry = |name: &str, category, latitude, longitude| CataloguedPoi {
            name: name.to_string(),
            category,
            location: Coordinates::new(latitude, longitude),
        };
        Self::new(vec![
            entry(
                "Andheri Railway Station",
                PoiCategory::RailwayStation,
                19.1197,
                72.8466,
            ),
            entry("D-Mart Andheri", PoiCategory::Supermarket, 19.1157, 72.8422),
            entry(
                "Ryan International School",
                PoiCategory::School,
                19.1156,
                72.8368,
            ),
        ])
    }

    /// Catalogue entries.
    #[must_use]
    pub fn entries(&self) -> &[CataloguedPoi] {
        &self.entries
    }
}

#[async_trait]
impl PoiLookup for StaticPoiLookup {
    async fn query(
        &self,
        at: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<PointOfInterest>, LookupError> {
        let pois = self
            .entries
            .iter()
            .map(|entry| PointOfInterest {
                name: entry.name.clone(),
                category: entry.category,
                distance_km: at.distance_km(&entry.location),
            })
            .filter(|poi| poi.distance_km <= radius_km)
            .collect();
        Ok(nearest_unique(pois))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poi(name: &str, category: PoiCategory, distance_km: f64) -> PointOfInterest {
        PointOfInterest {
            name: name.into(),
            category,
            distance_km,
        }
    }

    #[test]
    fn nearest_unique_sorts_and_dedupes() {
        let pois = nearest_unique(vec![
            poi("Mall", PoiCategory::ShoppingMall, 1.5),
            poi("School", PoiCategory::School, 0.4),
            poi("Mall", PoiCategory::ShoppingMall, 0.9),
        ]);
        let names: Vec<_> = pois.iter().map(|p| (p.name.as_str(), p.distance_km)).collect();
        assert_eq!(names, [("School", 0.4), ("Mall", 0.9)]);
    }

    #[tokio::test]
    async fn static_catalogue_filters_by_radius() {
        let lookup = StaticPoiLookup::mumbai();
        let near_station = Coordinates::new(19.1190, 72.8460);
        let pois = lookup.query(near_station, 2.0).await.unwrap();
        assert_eq!(pois.len(), 3);
        assert_eq!(pois[0].name, "Andheri Railway Station");
        assert!(pois.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));

        let far_away = Coordinates::new(18.52, 73.85);
        assert!(lookup.query(far_away, 2.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let lookup =
            HttpNearbyLookup::new("http://127.0.0.1:9/nearby", Duration::from_millis(500)).unwrap();
        let err = lookup
            .query(Coordinates::new(19.1, 72.9), 2.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LookupError::Transport(_) | LookupError::Timeout(_)
        ));
    }

    #[test]
    fn envelopes_tolerate_missing_fields() {
        let nearby: NearbyEnvelope = serde_json::from_str(
            r#"{"success": true, "properties": [{"pricePerUnitArea": 12000.0, "title": "x"}, {}]}"#,
        )
        .unwrap();
        assert!(nearby.success);
        assert_eq!(nearby.properties.len(), 2);
        assert_eq!(nearby.properties[1].price_per_unit_area, None);

        let pois: PoiEnvelope = serde_json::from_str(
            r#"{"success": true, "pois": [{"name": "Metro", "types": ["metro_station"], "lat": 19.1, "lng": 72.8}]}"#,
        )
        .unwrap();
        assert_eq!(pois.pois[0].distance, None);
    }
}
