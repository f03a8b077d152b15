//! Data models for geo resolution

use serde::{Deserialize, Serialize};

/// Geographic location, as far as it is known
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO country code (e.g., "ES", "US")
    pub country: Option<String>,

    /// Region/state/province, human-readable when a name is known
    pub region: Option<String>,

    /// City name
    pub city: Option<String>,

    /// IANA timezone (e.g., "Europe/Madrid")
    pub timezone: Option<String>,
}

impl GeoLocation {
    /// City or region still unknown
    pub fn is_incomplete(&self) -> bool {
        self.city.is_none() || self.region.is_none()
    }

    /// Fill only the fields that are still missing; known values are kept
    pub fn merge_missing(&mut self, other: GeoLocation) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.is_none() {
                *slot = value.filter(|v| !v.trim().is_empty());
            }
        }

        fill(&mut self.country, other.country);
        fill(&mut self.region, other.region);
        fill(&mut self.city, other.city);
        fill(&mut self.timezone, other.timezone);
    }
}
