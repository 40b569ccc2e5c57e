//! Proximity premium from nearby points of interest.
//!
//! Each POI contributes `base_weight * max(0, 1 - d/2) / (rank + 1)` where
//! `rank` is its position among POIs of the same category, nearest first.
//! Contributions are summed per impact class and the grand total is capped.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Distance at which a POI stops contributing.
pub const INFLUENCE_RADIUS_KM: f64 = 2.0;

const TOP_CONTRIBUTIONS: usize = 5;

/// Recognised POI categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiCategory {
    /// Bus or generic transit station.
    TransitStation,
    /// Metro station.
    MetroStation,
    /// Suburban railway station.
    RailwayStation,
    /// School.
    School,
    /// College or university.
    College,
    /// Shopping mall.
    ShoppingMall,
    /// Supermarket.
    Supermarket,
    /// Hospital.
    Hospital,
    /// Park.
    Park,
}

impl PoiCategory {
    /// Every category, in reporting order.
    pub const ALL: [Self; 9] = [
        Self::TransitStation,
        Self::MetroStation,
        Self::RailwayStation,
        Self::School,
        Self::College,
        Self::ShoppingMall,
        Self::Supermarket,
        Self::Hospital,
        Self::Park,
    ];

    /// Wire name, matching the POI service's type tags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransitStation => "transit_station",
            Self::MetroStation => "metro_station",
            Self::RailwayStation => "railway_station",
            Self::School => "school",
            Self::College => "college",
            Self::ShoppingMall => "shopping_mall",
            Self::Supermarket => "supermarket",
            Self::Hospital => "hospital",
            Self::Park => "park",
        }
    }

    /// Parses a type tag; unknown tags yield `None`.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(tag))
    }

    /// Premium contributed by a POI of this category at zero distance.
    #[must_use]
    pub const fn base_weight(self) -> f64 {
        match self {
            Self::MetroStation => 0.15,
            Self::TransitStation => 0.12,
            Self::RailwayStation => 0.10,
            Self::School => 0.08,
            Self::ShoppingMall => 0.07,
            Self::Hospital => 0.06,
            Self::College | Self::Park => 0.05,
            Self::Supermarket => 0.04,
        }
    }

    /// Impact class the category rolls up into.
    #[must_use]
    pub const fn impact_class(self) -> ImpactClass {
        match self {
            Self::TransitStation | Self::MetroStation | Self::RailwayStation => {
                ImpactClass::Transit
            }
            Self::School | Self::College => ImpactClass::Education,
            Self::ShoppingMall | Self::Supermarket => ImpactClass::Shopping,
            Self::Hospital => ImpactClass::Healthcare,
            Self::Park => ImpactClass::Recreation,
        }
    }
}

/// Groups of POI categories reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactClass {
    /// Stations of any kind.
    Transit,
    /// Schools and colleges.
    Education,
    /// Malls and supermarkets.
    Shopping,
    /// Hospitals.
    Healthcare,
    /// Parks.
    Recreation,
}

impl ImpactClass {
    /// Every class, in reporting order.
    pub const ALL: [Self; 5] = [
        Self::Transit,
        Self::Education,
        Self::Shopping,
        Self::Healthcare,
        Self::Recreation,
    ];
}

/// A POI found near a query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointOfInterest {
    /// Display name.
    pub name: String,
    /// Category.
    pub category: PoiCategory,
    /// Distance from the query point in kilometres.
    pub distance_km: f64,
}

/// Premium contributed by one POI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoiContribution {
    /// POI name.
    pub name: String,
    /// POI category.
    pub category: PoiCategory,
    /// Distance in kilometres.
    pub distance_km: f64,
    /// Zero-based position within its category.
    pub rank: usize,
    /// Premium fraction.
    pub impact: f64,
}

/// Hotspot premium for one query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotspotImpact {
    /// Premium per impact class, every class present.
    pub by_class: IndexMap<ImpactClass, f64>,
    /// Sum of class premiums, capped.
    pub total_impact: f64,
    /// Sum of class premiums before the cap.
    pub uncapped_impact: f64,
    /// Largest individual contributions, biggest first.
    pub top_contributions: Vec<PoiContribution>,
}

impl HotspotImpact {
    /// Scores POIs in the order given; callers pass them nearest first.
    #[must_use]
    pub fn score(pois: &[PointOfInterest], cap: f64) -> Self {
        let mut by_class: IndexMap<ImpactClass, f64> =
            ImpactClass::ALL.into_iter().map(|class| (class, 0.0)).collect();
        let mut ranks: IndexMap<PoiCategory, usize> = IndexMap::new();
        let mut contributions = Vec::with_capacity(pois.len());

        for poi in pois {
            let rank_slot = ranks.entry(poi.category).or_insert(0);
            let rank = *rank_slot;
            *rank_slot += 1;

            let impact = contribution(poi.category, poi.distance_km, rank);
            if let Some(total) = by_class.get_mut(&poi.category.impact_class()) {
                *total += impact;
            }
            if impact > 0.0 {
                contributions.push(PoiContribution {
                    name: poi.name.clone(),
                    category: poi.category,
                    distance_km: poi.distance_km,
                    rank,
                    impact,
                });
            }
        }

        contributions.sort_by(|a, b| b.impact.total_cmp(&a.impact));
        contributions.truncate(TOP_CONTRIBUTIONS);

        let uncapped_impact: f64 = by_class.values().sum();
        Self {
            by_class,
            total_impact: uncapped_impact.min(cap).max(0.0),
            uncapped_impact,
            top_contributions: contributions,
        }
    }

    /// Premium of a single class.
    #[must_use]
    pub fn class_impact(&self, class: ImpactClass) -> f64 {
        self.by_class.get(&class).copied().unwrap_or(0.0)
    }
}

fn contribution(category: PoiCategory, distance_km: f64, rank: usize) -> f64 {
    let distance = if distance_km.is_finite() {
        distance_km.max(0.0)
    } else {
        INFLUENCE_RADIUS_KM
    };
    let proximity = (1.0 - distance / INFLUENCE_RADIUS_KM).max(0.0);
    category.base_weight() * proximity / (rank as f64 + 1.0)
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
    fn second_school_contributes_less() {
        let impact = HotspotImpact::score(
            &[
                poi("Near School", PoiCategory::School, 0.5),
                poi("Far School", PoiCategory::School, 1.0),
            ],
            0.25,
        );
        let first = &impact.top_contributions[0];
        let second = &impact.top_contributions[1];
        assert_eq!(first.name, "Near School");
        assert!(first.impact > second.impact);
        assert!((first.impact - 0.06).abs() < 1e-12);
        assert!((second.impact - 0.02).abs() < 1e-12);
        assert!((impact.class_impact(ImpactClass::Education) - 0.08).abs() < 1e-12);
        assert!((impact.total_impact - 0.08).abs() < 1e-12);
    }

    #[test]
    fn rank_is_per_category() {
        let impact = HotspotImpact::score(
            &[
                poi("School", PoiCategory::School, 0.5),
                poi("College", PoiCategory::College, 0.5),
            ],
            0.25,
        );
        // both are first in their own category
        assert!(impact.top_contributions.iter().all(|c| c.rank == 0));
        let expected = 0.08 * 0.75 + 0.05 * 0.75;
        assert!((impact.class_impact(ImpactClass::Education) - expected).abs() < 1e-12);
    }

    #[test]
    fn total_is_capped() {
        let pois: Vec<_> = PoiCategory::ALL
            .iter()
            .map(|category| poi(category.as_str(), *category, 0.0))
            .collect();
        let impact = HotspotImpact::score(&pois, 0.25);
        assert!(impact.uncapped_impact > 0.25);
        assert!((impact.total_impact - 0.25).abs() < 1e-12);
        assert_eq!(impact.top_contributions.len(), 5);
        assert_eq!(impact.top_contributions[0].category, PoiCategory::MetroStation);
    }

    #[test]
    fn distant_pois_contribute_nothing() {
        let impact = HotspotImpact::score(&[poi("Park", PoiCategory::Park, 2.5)], 0.25);
        assert_eq!(impact.total_impact, 0.0);
        assert!(impact.top_contributions.is_empty());
        assert_eq!(impact.by_class.len(), 5);
        let empty = HotspotImpact::score(&[], 0.25);
        assert_eq!(empty.total_impact, 0.0);
    }

    #[test]
    fn parses_type_tags() {
        assert_eq!(PoiCategory::parse("Metro_Station"), Some(PoiCategory::MetroStation));
        assert_eq!(PoiCategory::parse("restaurant"), None);
        let json = serde_json::to_value(
            HotspotImpact::score(&[poi("Hospital", PoiCategory::Hospital, 1.0)], 0.25),
        )
        .unwrap();
        assert!(json["byClass"]["healthcare"].as_f64().unwrap() > 0.0);
    }
}
