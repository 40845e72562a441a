use log::{debug, info};
use reqwest::Client;
use serde::Serialize;
use url::Url;

use crate::config::AppConfig;
use crate::error::{PipelineError, Provider};

const MAX_URL_LENGTH: usize = 2000;
const SHORT_LINK_HOSTS: &[&str] = &["maps.app.goo.gl", "goo.gl"];

/// A resolved latitude/longitude pair. Construction validates ranges, so a
/// `Coordinate` in hand is always on the globe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) {
            Some(Self { lat, lng })
        } else {
            None
        }
    }
}

/// Validate the user-supplied link, expand it if it is a short link, and
/// pull a coordinate pair out of the final URL.
pub async fn resolve_coordinates(
    client: &Client,
    config: &AppConfig,
    raw_url: &str,
) -> Result<Coordinate, PipelineError> {
    let url = validate_url(raw_url)?;

    let expanded = if is_short_link(&url) {
        expand_short_url(client, config, url.as_str()).await?
    } else {
        url.to_string()
    };
    debug!("Resolving coordinates from: {}", expanded);

    let coordinate = extract_coordinates(&expanded).ok_or(PipelineError::NoCoordinates)?;
    info!("Resolved coordinates: {}, {}", coordinate.lat, coordinate.lng);
    Ok(coordinate)
}

fn validate_url(raw: &str) -> Result<Url, PipelineError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PipelineError::InvalidUrl("URL is empty".to_string()));
    }
    if raw.len() > MAX_URL_LENGTH {
        return Err(PipelineError::InvalidUrl(
            "URL exceeds maximum length".to_string(),
        ));
    }
    let url = Url::parse(raw)
        .map_err(|e| PipelineError::InvalidUrl(format!("not a valid URL: {}", e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(PipelineError::InvalidUrl(
            "only http(s) links are accepted".to_string(),
        ));
    }
    Ok(url)
}

fn is_short_link(url: &Url) -> bool {
    url.host_str()
        .map(|host| SHORT_LINK_HOSTS.contains(&host))
        .unwrap_or(false)
}

/// Follow the short link's redirect chain and return the final URL. The hop
/// bound lives in the client's redirect policy; overrunning it surfaces as
/// a "too many redirects" input error.
async fn expand_short_url(
    client: &Client,
    config: &AppConfig,
    short_url: &str,
) -> Result<String, PipelineError> {
    debug!("Expanding short URL: {}", short_url);
    let response = client
        .get(short_url)
        .timeout(config.resolver_timeout)
        .send()
        .await
        .map_err(|e| PipelineError::from_transport(Provider::GooglePlaces, e))?;
    let expanded = response.url().to_string();
    info!("Expanded URL: {}", expanded);
    Ok(expanded)
}

/// Try the Google Maps URL shapes in priority order: `@lat,lng`, then
/// `!3dLAT!4dLNG`, then any bare in-range `lat,lng` pair.
pub fn extract_coordinates(url: &str) -> Option<Coordinate> {
    if let Some(coord) = pair_after_marker(url, "@", ",") {
        return Some(coord);
    }
    if let Some(coord) = bang_3d_4d(url) {
        return Some(coord);
    }
    bare_pair(url)
}

fn pair_after_marker(url: &str, marker: &str, sep: &str) -> Option<Coordinate> {
    let mut search_from = 0;
    while let Some(pos) = url[search_from..].find(marker) {
        let start = search_from + pos + marker.len();
        if let Some((lat, rest)) = leading_float(&url[start..]) {
            if let Some(rest) = rest.strip_prefix(sep) {
                if let Some((lng, _)) = leading_float(rest) {
                    if let Some(coord) = Coordinate::new(lat, lng) {
                        return Some(coord);
                    }
                }
            }
        }
        search_from = start;
    }
    None
}

fn bang_3d_4d(url: &str) -> Option<Coordinate> {
    let mut search_from = 0;
    while let Some(pos) = url[search_from..].find("!3d") {
        let start = search_from + pos + 3;
        if let Some((lat, rest)) = leading_float(&url[start..]) {
            if let Some(rest) = rest.strip_prefix("!4d") {
                if let Some((lng, _)) = leading_float(rest) {
                    if let Some(coord) = Coordinate::new(lat, lng) {
                        return Some(coord);
                    }
                }
            }
        }
        search_from = start;
    }
    None
}

/// Last-resort scan for any `lat,lng` pair of decimals; only accepted when
/// both values are in range, so version numbers and zoom levels fall out.
fn bare_pair(url: &str) -> Option<Coordinate> {
    let bytes = url.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() || bytes[i] == b'-' || bytes[i] == b'+' {
            if let Some((lat, rest)) = leading_float(&url[i..]) {
                let consumed = url.len() - i - rest.len();
                let after = rest.strip_prefix(',').map(|r| r.trim_start_matches(' '));
                if let Some(after) = after {
                    if let Some((lng, _)) = leading_float(after) {
                        if let Some(coord) = Coordinate::new(lat, lng) {
                            return Some(coord);
                        }
                    }
                }
                i += consumed.max(1);
                continue;
            }
        }
        i += 1;
    }
    None
}

/// Parse a signed decimal with a mandatory fractional part from the front of
/// `s`, returning the value and the remainder. Integers are rejected so that
/// path segments like `/maps/place/12` never look like coordinates.
fn leading_float(s: &str) -> Option<(f64, &str)> {
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == int_start {
        return None;
    }
    if end >= bytes.len() || bytes[end] != b'.' {
        return None;
    }
    end += 1;
    let frac_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == frac_start {
        return None;
    }
    s[..end].parse().ok().map(|v| (v, &s[end..]))
}
