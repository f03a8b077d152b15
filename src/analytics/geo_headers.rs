//! Geo attributes injected by the edge proxy
//!
//! Vercel and Cloudflare both annotate requests with the visitor's country,
//! region, city and timezone. Values are taken verbatim, except that known
//! ISO 3166-2 region codes are replaced by their names.

use axum::http::HeaderMap;

use crate::analytics::models::GeoLocation;

pub const COUNTRY_HEADERS: &[&str] = &["x-vercel-ip-country", "cf-ipcountry", "x-country-code"];
pub const REGION_HEADERS: &[&str] = &["x-vercel-ip-country-region", "x-region-code"];
pub const CITY_HEADERS: &[&str] = &["x-vercel-ip-city", "cf-ipcity", "x-city"];
pub const TIMEZONE_HEADERS: &[&str] = &["x-vercel-ip-timezone", "cf-timezone"];

/// Cloudflare's "unknown" and "Tor" country markers
const COUNTRY_SENTINELS: &[&str] = &["XX", "T1"];

fn first_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|h| h.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Read whatever geo attributes the edge provided
pub fn read_geo_headers(headers: &HeaderMap) -> GeoLocation {
    let country = first_header(headers, COUNTRY_HEADERS)
        .map(|c| c.to_uppercase())
        .filter(|c| !COUNTRY_SENTINELS.contains(&c.as_str()));

    let region = first_header(headers, REGION_HEADERS).map(|code| {
        country
            .as_deref()
            .and_then(|c| region_name(c, &code))
            .map(str::to_string)
            .unwrap_or(code)
    });

    // Vercel percent-encodes the city name
    let city = first_header(headers, CITY_HEADERS).map(|raw| {
        urlencoding::decode(&raw)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(raw)
    });

    let timezone = first_header(headers, TIMEZONE_HEADERS);

    GeoLocation {
        country,
        region,
        city,
        timezone,
    }
}

/// Human-readable name of a subdivision code for a recognized country
pub fn region_name(country: &str, code: &str) -> Option<&'static str> {
    let code = code.trim().to_uppercase();
    // Accept both "MD" and "ES-MD"
    let code = code
        .strip_prefix(&format!("{}-", country.to_uppercase()))
        .unwrap_or(&code)
        .to_string();

    match country.to_uppercase().as_str() {
        "ES" => spain_region(&code),
        "US" => us_state(&code),
        _ => None,
    }
}

fn spain_region(code: &str) -> Option<&'static str> {
    let name = match code {
        // Autonomous communities and cities
        "AN" => "Andalucía",
        "AR" => "Aragón",
        "AS" => "Asturias",
        "CB" => "Cantabria",
        "CE" => "Ceuta",
        "CL" => "Castilla y León",
        "CM" => "Castilla-La Mancha",
        "CN" => "Canarias",
        "CT" => "Cataluña",
        "EX" => "Extremadura",
        "GA" => "Galicia",
        "IB" => "Illes Balears",
        "MC" => "Región de Murcia",
        "MD" => "Comunidad de Madrid",
        "ML" => "Melilla",
        "NC" => "Navarra",
        "PV" => "País Vasco",
        "RI" => "La Rioja",
        "VC" => "Comunitat Valenciana",
        // Provinces
        "A" => "Alicante",
        "AB" => "Albacete",
        "AL" => "Almería",
        "AV" => "Ávila",
        "B" => "Barcelona",
        "BA" => "Badajoz",
        "BI" => "Bizkaia",
        "BU" => "Burgos",
        "C" => "A Coruña",
        "CA" => "Cádiz",
        "CC" => "Cáceres",
        "CO" => "Córdoba",
        "CR" => "Ciudad Real",
        "CS" => "Castellón",
        "CU" => "Cuenca",
        "GC" => "Las Palmas",
        "GI" => "Girona",
        "GR" => "Granada",
        "GU" => "Guadalajara",
        "H" => "Huelva",
        "HU" => "Huesca",
        "J" => "Jaén",
        "L" => "Lleida",
        "LE" => "León",
        "LO" => "La Rioja",
        "LU" => "Lugo",
        "M" => "Madrid",
        "MA" => "Málaga",
        "MU" => "Murcia",
        "NA" => "Navarra",
        "O" => "Asturias",
        "OR" => "Ourense",
        "P" => "Palencia",
        "PM" => "Illes Balears",
        "PO" => "Pontevedra",
        "S" => "Cantabria",
        "SA" => "Salamanca",
        "SE" => "Sevilla",
        "SG" => "Segovia",
        "SO" => "Soria",
        "SS" => "Gipuzkoa",
        "T" => "Tarragona",
        "TE" => "Teruel",
        "TF" => "Santa Cruz de Tenerife",
        "TO" => "Toledo",
        "V" => "Valencia",
        "VA" => "Valladolid",
        "VI" => "Araba",
        "Z" => "Zaragoza",
        "ZA" => "Zamora",
        _ => return None,
    };
    Some(name)
}

fn us_state(code: &str) -> Option<&'static str> {
    let name = match code {
        "AL" => "Alabama",
        "AK" => "Alaska",
        "AZ" => "Arizona",
        "AR" => "Arkansas",
        "CA" => "California",
        "CO" => "Colorado",
        "CT" => "Connecticut",
        "DE" => "Delaware",
        "DC" => "District of Columbia",
        "FL" => "Florida",
        "GA" => "Georgia",
        "HI" => "Hawaii",
        "ID" => "Idaho",
        "IL" => "Illinois",
        "IN" => "Indiana",
        "IA" => "Iowa",
        "KS" => "Kansas",
        "KY" => "Kentucky",
        "LA" => "Louisiana",
        "ME" => "Maine",
        "MD" => "Maryland",
        "MA" => "Massachusetts",
        "MI" => "Michigan",
        "MN" => "Minnesota",
        "MS" => "Mississippi",
        "MO" => "Missouri",
        "MT" => "Montana",
        "NE" => "Nebraska",
        "NV" => "Nevada",
        "NH" => "New Hampshire",
        "NJ" => "New Jersey",
        "NM" => "New Mexico",
        "NY" => "New York",
        "NC" => "North Carolina",
        "ND" => "North Dakota",
        "OH" => "Ohio",
        "OK" => "Oklahoma",
        "OR" => "Oregon",
        "PA" => "Pennsylvania",
        "RI" => "Rhode Island",
        "SC" => "South Carolina",
        "SD" => "South Dakota",
        "TN" => "Tennessee",
        "TX" => "Texas",
        "UT" => "Utah",
        "VT" => "Vermont",
        "VA" => "Virginia",
        "WA" => "Washington",
        "WV" => "West Virginia",
        "WI" => "Wisconsin",
        "WY" => "Wyoming",
        _ => return None,
    };
    Some(name)
}
