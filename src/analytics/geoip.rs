//! Local GeoIP lookup using a MaxMind GeoLite2/GeoIP2 City MMDB
//!
//! This is the middle tier of the geo fallback chain: it costs no network
//! round trip, so it runs before any external provider.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use crate::analytics::models::GeoLocation;

/// Memory-mapped City database
#[derive(Clone)]
pub struct GeoIpService {
    city_reader: Arc<Reader<Mmap>>,
}

impl GeoIpService {
    /// Open a City (or Country) database from disk
    pub fn new(city_path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(city_path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", city_path))?;

        Ok(Self {
            city_reader: Arc::new(reader),
        })
    }

    /// Lookup an address; unknown addresses yield an empty location
    pub fn lookup(&self, ip: IpAddr) -> GeoLocation {
        let mut geo_location = GeoLocation::default();

        if let Ok(result) = self.city_reader.lookup(ip) {
            if let Ok(Some(city)) = result.decode::<geoip2::City>() {
                extract_from_city(&city, &mut geo_location);
            } else if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
                // A Country database only carries the country fields
                geo_location.country = country.country.iso_code.map(|s| s.to_string());
            }
        }

        geo_location
    }
}

fn extract_from_city(city: &geoip2::City, geo_location: &mut GeoLocation) {
    geo_location.country = city.country.iso_code.map(|s| s.to_string());

    if let Some(subdivision) = city.subdivisions.first() {
        geo_location.region = subdivision.names.english.map(|s| s.to_string());
    }

    geo_location.city = city.city.names.english.map(|s| s.to_string());
    geo_location.timezone = city.location.time_zone.map(|s| s.to_string());
}
