//! Forward geocoding and region reconciliation.
//!
//! Nominatim-compatible search restricted to Spain, with the mandated
//! ≥ 1.1s request spacing and an identifying User-Agent. Queries go from
//! specific to general; results are cached by normalized query hash. A
//! separate municipality registry resolves the authoritative comunidad
//! autónoma for a city; when it disagrees with the source-declared region,
//! the resolved value wins and the query set drops the region hint.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cartelera_common::text::fingerprint;
use cartelera_common::EventDraft;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
const REGION_API_URL: &str = "https://ccaa-provincias-municipios-localida.vercel.app/api/buscar";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1100);

#[derive(Debug, Clone)]
pub struct GeoResult {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: String,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct NominatimRow {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default, rename = "type")]
    place_type: Option<String>,
}

pub struct Geocoder {
    http: reqwest::Client,
    user_agent: String,
    nominatim_url: String,
    region_api_url: String,
    last_request: Mutex<Option<Instant>>,
    cache: Mutex<HashMap<u64, Option<GeoResult>>>,
    region_cache: Mutex<HashMap<String, Option<String>>>,
}

impl Geocoder {
    pub fn new(user_agent: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build geocoder HTTP client"),
            user_agent: user_agent.to_string(),
            nominatim_url: NOMINATIM_URL.to_string(),
            region_api_url: REGION_API_URL.to_string(),
            last_request: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
            region_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fill coordinates and reconcile the region on an event in place.
    pub async fn fill(&self, event: &mut EventDraft) {
        let resolved_region = self.resolve_region(event.city.as_deref()).await;
        let region_hint = apply_region_reconciliation(event, resolved_region.as_deref());

        if event.has_coordinates() {
            return;
        }

        let strategies = build_strategies(
            event.venue_name.as_deref(),
            event.address.as_deref(),
            event.city.as_deref(),
            event.province.as_deref(),
            region_hint.as_deref(),
        );

        for query in strategies {
            if let Some(result) = self.search(&query).await {
                event.latitude = Some(result.latitude);
                event.longitude = Some(result.longitude);
                debug!(query = %query, confidence = result.confidence, "geocoded");
                return;
            }
        }
    }

    async fn search(&self, query: &str) -> Option<GeoResult> {
        let key = fingerprint(&query.to_lowercase());
        if let Some(cached) = self.cache.lock().await.get(&key) {
            return cached.clone();
        }

        self.wait_for_interval().await;

        let response = self
            .http
            .get(&self.nominatim_url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", "es"),
                ("addressdetails", "1"),
            ])
            .header("User-Agent", &self.user_agent)
            .send()
            .await;

        let result = match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<Vec<NominatimRow>>().await {
                Ok(rows) => rows.into_iter().next().and_then(row_to_result),
                Err(e) => {
                    warn!(query, error = %e, "geocoder response unparseable");
                    None
                }
            },
            Ok(resp) => {
                warn!(query, status = resp.status().as_u16(), "geocoder HTTP error");
                return None; // Don't cache transient failures.
            }
            Err(e) => {
                warn!(query, error = %e, "geocoder request failed");
                return None;
            }
        };

        self.cache.lock().await.insert(key, result.clone());
        result
    }

    /// The ≥ 1.1s politeness interval, serialized across callers.
    async fn wait_for_interval(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Authoritative comunidad autónoma for a city, from the municipality
    /// registry. Cached per process; never invalidated during a run.
    pub async fn resolve_region(&self, city: Option<&str>) -> Option<String> {
        let city = city?.trim();
        if city.is_empty() {
            return None;
        }
        let cache_key = city.to_lowercase();

        if let Some(cached) = self.region_cache.lock().await.get(&cache_key) {
            return cached.clone();
        }

        let resolved = self.query_region(city).await;
        self.region_cache
            .lock()
            .await
            .insert(cache_key, resolved.clone());
        resolved
    }

    async fn query_region(&self, city: &str) -> Option<String> {
        #[derive(Deserialize)]
        struct RegionResponse {
            #[serde(default)]
            results: RegionResults,
        }
        #[derive(Deserialize, Default)]
        struct RegionResults {
            #[serde(default)]
            municipios: Vec<RegionEntry>,
            #[serde(default)]
            provincias: Vec<RegionEntry>,
        }
        #[derive(Deserialize)]
        struct RegionEntry {
            nombre: String,
            comunidad: Option<String>,
        }

        let response = self
            .http
            .get(&self.region_api_url)
            .query(&[("q", city)])
            .header("User-Agent", &self.user_agent)
            .send()
            .await;

        let body: RegionResponse = match response {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(city, error = %e, "region registry response unparseable");
                    return None;
                }
            },
            Ok(resp) => {
                warn!(city, status = resp.status().as_u16(), "region registry HTTP error");
                return None;
            }
            Err(e) => {
                warn!(city, error = %e, "region registry request failed");
                return None;
            }
        };

        let city_lower = city.to_lowercase();

        // Exact municipality match is the most reliable, then exact province,
        // then the first municipality containing the name ("Las Palmas" for
        // "Las Palmas de Gran Canaria").
        body.results
            .municipios
            .iter()
            .find(|m| m.nombre.to_lowercase() == city_lower)
            .or_else(|| {
                body.results
                    .provincias
                    .iter()
                    .find(|p| p.nombre.to_lowercase() == city_lower)
            })
            .or_else(|| body.results.municipios.first())
            .and_then(|entry| entry.comunidad.clone())
    }
}

fn row_to_result(row: NominatimRow) -> Option<GeoResult> {
    let latitude: f64 = row.lat.parse().ok()?;
    let longitude: f64 = row.lon.parse().ok()?;
    Some(GeoResult {
        latitude,
        longitude,
        confidence: confidence_for(
            row.importance.unwrap_or(0.5),
            row.place_type.as_deref().unwrap_or(""),
        ),
        display_name: row.display_name,
    })
}

/// Importance plus a type-specific boost: named venues rank above streets
/// and bare cities.
pub fn confidence_for(importance: f64, place_type: &str) -> f64 {
    let boost = match place_type {
        "theatre" | "arts_centre" | "community_centre" | "museum" => 0.2,
        "library" | "venue" => 0.15,
        "building" => 0.1,
        "street" => 0.05,
        _ => 0.0,
    };
    (importance + boost).min(1.0)
}

/// Specific-to-general query ladder. The region hint, when present, only
/// decorates the city+province rung.
pub fn build_strategies(
    venue: Option<&str>,
    address: Option<&str>,
    city: Option<&str>,
    province: Option<&str>,
    region_hint: Option<&str>,
) -> Vec<String> {
    let mut strategies = Vec::new();

    if let (Some(venue), Some(city), Some(province)) = (venue, city, province) {
        strategies.push(format!("{venue}, {city}, {province}, España"));
    }
    if let (Some(address), Some(city), Some(province)) = (address, city, province) {
        strategies.push(format!("{address}, {city}, {province}, España"));
    }
    if let (Some(address), Some(city)) = (address, city) {
        strategies.push(format!("{address}, {city}, España"));
    }
    if let (Some(venue), Some(city)) = (venue, city) {
        strategies.push(format!("{venue}, {city}, España"));
    }
    if let (Some(city), Some(province)) = (city, province) {
        match region_hint {
            Some(region) => strategies.push(format!("{city}, {province}, {region}, España")),
            None => strategies.push(format!("{city}, {province}, España")),
        }
    }
    if let Some(city) = city {
        strategies.push(format!("{city}, España"));
    }

    strategies
}

/// The hint to keep in geocode queries: the declared region survives only
/// when the registry agrees (or had no opinion).
pub fn reconcile_region(declared: Option<&str>, resolved: Option<&str>) -> Option<String> {
    match (declared, resolved) {
        (Some(d), Some(r)) if !d.eq_ignore_ascii_case(r) => None,
        (Some(d), _) => Some(d.to_string()),
        (None, _) => None,
    }
}

/// Registry wins over the source's declaration. Overwrites `event.region`
/// when they disagree and returns the hint the geocode queries may keep.
/// A mismatched hint is dropped to avoid false matches.
pub fn apply_region_reconciliation(
    event: &mut EventDraft,
    resolved: Option<&str>,
) -> Option<String> {
    let hint = reconcile_region(event.region.as_deref(), resolved);
    if let Some(resolved) = resolved {
        if event.region.as_deref() != Some(resolved) {
            info!(
                city = event.city.as_deref().unwrap_or(""),
                declared = event.region.as_deref().unwrap_or(""),
                resolved,
                "region mismatch, registry value wins"
            );
            event.region = Some(resolved.to_string());
        }
    }
    hint
}
