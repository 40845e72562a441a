use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use crate::config::AppConfig;
use crate::error::{PipelineError, Provider};
use crate::resolver::Coordinate;

const NEARBY_SEARCH_URL: &str =
    "https://maps.googleapis.com/maps/api/place/nearbysearch/json";

// The API needs a short pause before a next_page_token becomes valid.
const PAGE_TOKEN_DELAY: Duration = Duration::from_secs(2);

/// One restaurant as returned by the places provider, in ranking order.
/// `category` stays `None` until the classifier has run.
#[derive(Debug, Clone, Serialize)]
pub struct VenueRecord {
    pub place_id: String,
    pub name: String,
    pub address: String,
    pub coordinate: Coordinate,
    pub rating: Option<f64>,
    pub category_hints: Vec<String>,
    pub map_url: String,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NearbySearchResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<PlaceResult>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaceResult {
    place_id: String,
    name: String,
    vicinity: Option<String>,
    rating: Option<f64>,
    #[serde(default)]
    types: Vec<String>,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

/// Fetch restaurants around `center`, following pagination up to the
/// configured page cap. An empty list is a valid outcome, not an error.
pub async fn nearby_restaurants(
    client: &Client,
    config: &AppConfig,
    center: Coordinate,
    radius_m: f64,
) -> Result<Vec<VenueRecord>, PipelineError> {
    if radius_m <= 0.0 || !radius_m.is_finite() {
        return Err(PipelineError::InvalidRadius(radius_m));
    }

    info!(
        "Fetching restaurants around {},{} within {}m",
        center.lat, center.lng, radius_m
    );

    let mut venues = Vec::new();
    let mut page_token: Option<String> = None;
    for page in 0..config.max_result_pages {
        let response = fetch_page(client, config, center, radius_m, page_token.as_deref()).await?;
        let batch = parse_page(response)?;
        debug!("Page {}: {} venues", page, batch.venues.len());
        venues.extend(batch.venues);

        match batch.next_page_token {
            Some(token) if page + 1 < config.max_result_pages => {
                page_token = Some(token);
                sleep(PAGE_TOKEN_DELAY).await;
            }
            _ => break,
        }
    }

    info!("Found {} restaurants", venues.len());
    Ok(venues)
}

async fn fetch_page(
    client: &Client,
    config: &AppConfig,
    center: Coordinate,
    radius_m: f64,
    page_token: Option<&str>,
) -> Result<NearbySearchResponse, PipelineError> {
    let location = format!("{},{}", center.lat, center.lng);
    let radius = radius_m.to_string();

    let mut request = client
        .get(NEARBY_SEARCH_URL)
        .timeout(config.places_timeout)
        .query(&[("key", config.google_maps_key.as_str())]);

    request = match page_token {
        Some(token) => request.query(&[("pagetoken", token)]),
        None => request.query(&[
            ("location", location.as_str()),
            ("radius", radius.as_str()),
            ("type", "restaurant"),
        ]),
    };

    let response = request
        .send()
        .await
        .map_err(|e| PipelineError::from_transport(Provider::GooglePlaces, e))?;

    response
        .json::<NearbySearchResponse>()
        .await
        .map_err(|e| PipelineError::MalformedResponse {
            provider: Provider::GooglePlaces,
            detail: e.to_string(),
        })
}

struct PageBatch {
    venues: Vec<VenueRecord>,
    next_page_token: Option<String>,
}

/// Map the provider's status field onto the error taxonomy and convert the
/// raw results into venue records. Results without a valid coordinate or a
/// name are dropped with a warning rather than poisoning the batch.
fn parse_page(response: NearbySearchResponse) -> Result<PageBatch, PipelineError> {
    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => {
            return Ok(PageBatch {
                venues: Vec::new(),
                next_page_token: None,
            })
        }
        "REQUEST_DENIED" => {
            return Err(PipelineError::ProviderAuth {
                provider: Provider::GooglePlaces,
            })
        }
        "OVER_QUERY_LIMIT" => {
            return Err(PipelineError::ProviderQuota {
                provider: Provider::GooglePlaces,
            })
        }
        other => {
            return Err(PipelineError::MalformedResponse {
                provider: Provider::GooglePlaces,
                detail: format!(
                    "status {} ({})",
                    other,
                    response.error_message.as_deref().unwrap_or("no detail")
                ),
            })
        }
    }

    let mut venues = Vec::with_capacity(response.results.len());
    for result in response.results {
        let coordinate =
            match Coordinate::new(result.geometry.location.lat, result.geometry.location.lng) {
                Some(c) => c,
                None => {
                    warn!(
                        "Dropping venue {} with out-of-range coordinates {},{}",
                        result.name, result.geometry.location.lat, result.geometry.location.lng
                    );
                    continue;
                }
            };
        if result.name.trim().is_empty() {
            warn!("Dropping venue {} with empty name", result.place_id);
            continue;
        }
        let map_url = format!(
            "https://www.google.com/maps/place/?q=place_id:{}",
            result.place_id
        );
        venues.push(VenueRecord {
            place_id: result.place_id,
            name: result.name,
            address: result.vicinity.unwrap_or_default(),
            coordinate,
            rating: result.rating,
            category_hints: result.types,
            map_url,
            category: None,
        });
    }

    Ok(PageBatch {
        venues,
        next_page_token: response.next_page_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_from(json: &str) -> NearbySearchResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_ok_page_in_order() {
        let response = response_from(
            r#"{
                "status": "OK",
                "results": [
                    {
                        "place_id": "a1",
                        "name": "Spice House",
                        "vicinity": "1 Main St",
                        "rating": 4.4,
                        "types": ["restaurant", "food"],
                        "geometry": {"location": {"lat": 24.71, "lng": 46.67}}
                    },
                    {
                        "place_id": "b2",
                        "name": "Shawarma Corner",
                        "geometry": {"location": {"lat": 24.72, "lng": 46.68}}
                    }
                ],
                "next_page_token": "tok"
            }"#,
        );
        let batch = parse_page(response).unwrap();
        assert_eq!(batch.venues.len(), 2);
        assert_eq!(batch.venues[0].name, "Spice House");
        assert_eq!(batch.venues[0].rating, Some(4.4));
        assert_eq!(batch.venues[0].category_hints, vec!["restaurant", "food"]);
        assert!(batch.venues[0].map_url.ends_with("place_id:a1"));
        assert_eq!(batch.venues[1].name, "Shawarma Corner");
        assert_eq!(batch.venues[1].address, "");
        assert!(batch.venues[1].category.is_none());
        assert_eq!(batch.next_page_token.as_deref(), Some("tok"));
    }

    #[test]
    fn zero_results_is_empty_not_error() {
        let response = response_from(r#"{"status": "ZERO_RESULTS"}"#);
        let batch = parse_page(response).unwrap();
        assert!(batch.venues.is_empty());
        assert!(batch.next_page_token.is_none());
    }

    #[test]
    fn request_denied_maps_to_auth_error() {
        let response = response_from(r#"{"status": "REQUEST_DENIED", "error_message": "bad key"}"#);
        match parse_page(response) {
            Err(PipelineError::ProviderAuth { provider }) => {
                assert_eq!(provider, Provider::GooglePlaces)
            }
            other => panic!("expected auth error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn over_query_limit_maps_to_quota_error() {
        let response = response_from(r#"{"status": "OVER_QUERY_LIMIT"}"#);
        assert!(matches!(
            parse_page(response),
            Err(PipelineError::ProviderQuota { .. })
        ));
    }

    #[test]
    fn unknown_status_carries_detail() {
        let response =
            response_from(r#"{"status": "INVALID_REQUEST", "error_message": "radius missing"}"#);
        match parse_page(response) {
            Err(PipelineError::MalformedResponse { detail, .. }) => {
                assert!(detail.contains("INVALID_REQUEST"));
                assert!(detail.contains("radius missing"));
            }
            other => panic!("expected malformed error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn out_of_range_venue_is_dropped() {
        let response = response_from(
            r#"{
                "status": "OK",
                "results": [
                    {
                        "place_id": "bad",
                        "name": "Nowhere",
                        "geometry": {"location": {"lat": 99.0, "lng": 46.67}}
                    },
                    {
                        "place_id": "good",
                        "name": "Somewhere",
                        "geometry": {"location": {"lat": 24.71, "lng": 46.67}}
                    }
                ]
            }"#,
        );
        let batch = parse_page(response).unwrap();
        assert_eq!(batch.venues.len(), 1);
        assert_eq!(batch.venues[0].place_id, "good");
    }

    #[test]
    fn schema_violation_is_a_deserialize_error() {
        let result = serde_json::from_str::<NearbySearchResponse>(
            r#"{"status": "OK", "results": [{"name": "Missing Fields"}]}"#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_radius_is_an_input_error() {
        let client = Client::new();
        let config = crate::config::AppConfig {
            bind_address: String::new(),
            google_maps_key: "k".into(),
            openai_key: "k".into(),
            openai_model: "m".into(),
            categories: crate::config::CategorySet::default(),
            default_radius_m: 1500.0,
            resolver_timeout: Duration::from_secs(1),
            places_timeout: Duration::from_secs(1),
            classify_timeout: Duration::from_secs(1),
            max_redirect_hops: 5,
            max_result_pages: 1,
            classify_concurrency: 1,
        };
        let center = Coordinate::new(24.71, 46.67).unwrap();
        let result = nearby_restaurants(&client, &config, center, 0.0).await;
        assert!(matches!(result, Err(PipelineError::InvalidRadius(r)) if r == 0.0));
        let result = nearby_restaurants(&client, &config, center, -5.0).await;
        assert!(matches!(result, Err(PipelineError::InvalidRadius(_))));
    }
}
