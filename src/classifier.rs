use std::sync::Arc;

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};

use crate::config::{AppConfig, CategorySet, UNCLASSIFIED};
use crate::error::{PipelineError, Provider};
use crate::places::VenueRecord;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Classify every venue with bounded parallel fan-out, preserving the
/// provider's ranking order. Venues are independent; a single failed call
/// (after its retry) fails the whole request per the error contract.
pub async fn classify_all(
    client: &Client,
    config: &AppConfig,
    venues: Vec<VenueRecord>,
) -> Result<Vec<VenueRecord>, PipelineError> {
    if venues.is_empty() {
        return Ok(venues);
    }
    info!(
        "Classifying {} venues (fan-out {})",
        venues.len(),
        config.classify_concurrency
    );

    let semaphore = Arc::new(Semaphore::new(config.classify_concurrency));
    let tasks = venues.into_iter().map(|venue| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            // Holds until a slot frees up; closing never happens here.
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            classify_venue(client, config, venue).await
        }
    });

    let results = futures::future::join_all(tasks).await;
    results.into_iter().collect()
}

/// Ask the model for one label and attach it to the venue. An unmatched
/// reply is a data condition, not a failure: the venue comes back with the
/// unclassified sentinel.
pub async fn classify_venue(
    client: &Client,
    config: &AppConfig,
    mut venue: VenueRecord,
) -> Result<VenueRecord, PipelineError> {
    let reply = chat_with_retry(client, config, &venue).await?;
    debug!("Model reply for {}: {:?}", venue.name, reply);

    let label = match config.categories.match_label(&reply) {
        Some(label) => label.to_string(),
        None => {
            warn!(
                "Reply {:?} for {} matches no configured category",
                reply, venue.name
            );
            UNCLASSIFIED.to_string()
        }
    };
    info!("Classified {} -> {}", venue.name, label);
    venue.category = Some(label);
    Ok(venue)
}

/// One retry with a fixed backoff, on transport errors only. A reply that
/// parses but matches nothing is never retried.
async fn chat_with_retry(
    client: &Client,
    config: &AppConfig,
    venue: &VenueRecord,
) -> Result<String, PipelineError> {
    match chat_once(client, config, venue).await {
        Err(PipelineError::Transport { source, .. }) => {
            warn!(
                "Classification call for {} failed ({}), retrying once",
                venue.name, source
            );
            sleep(RETRY_BACKOFF).await;
            chat_once(client, config, venue).await
        }
        other => other,
    }
}

async fn chat_once(
    client: &Client,
    config: &AppConfig,
    venue: &VenueRecord,
) -> Result<String, PipelineError> {
    let body = json!({
        "model": config.openai_model,
        "messages": [
            {"role": "system", "content": system_prompt(&config.categories)},
            {"role": "user", "content": user_prompt(venue)}
        ],
        "max_tokens": 20,
        "temperature": 0.0
    });

    let response = client
        .post(CHAT_COMPLETIONS_URL)
        .timeout(config.classify_timeout)
        .bearer_auth(&config.openai_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| PipelineError::from_transport(Provider::OpenAi, e))?;

    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(PipelineError::ProviderAuth {
                provider: Provider::OpenAi,
            })
        }
        StatusCode::TOO_MANY_REQUESTS => {
            return Err(PipelineError::ProviderQuota {
                provider: Provider::OpenAi,
            })
        }
        status if !status.is_success() => {
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::MalformedResponse {
                provider: Provider::OpenAi,
                detail: format!("status {}: {}", status, detail),
            });
        }
        _ => {}
    }

    let parsed = response
        .json::<ChatResponse>()
        .await
        .map_err(|e| PipelineError::MalformedResponse {
            provider: Provider::OpenAi,
            detail: e.to_string(),
        })?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| PipelineError::MalformedResponse {
            provider: Provider::OpenAi,
            detail: "response contained no choices".to_string(),
        })?;

    Ok(content.trim().to_string())
}

fn system_prompt(categories: &CategorySet) -> String {
    format!(
        "You classify restaurants by cuisine. Pick exactly one category from \
         this list: {}. Reply with the matching category word only, no \
         explanation.",
        categories.labels().join(", ")
    )
}

fn user_prompt(venue: &VenueRecord) -> String {
    format!(
        "Name: {}\nAddress: {}\nTypes: {}",
        venue.name,
        venue.address,
        venue.category_hints.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Coordinate;

    fn venue(name: &str) -> VenueRecord {
        VenueRecord {
            place_id: "p1".to_string(),
            name: name.to_string(),
            address: "1 Main St".to_string(),
            coordinate: Coordinate::new(24.71, 46.67).unwrap(),
            rating: Some(4.2),
            category_hints: vec!["restaurant".to_string(), "food".to_string()],
            map_url: "https://www.google.com/maps/place/?q=place_id:p1".to_string(),
            category: None,
        }
    }

    #[test]
    fn system_prompt_lists_all_categories() {
        let categories = CategorySet::from_csv("Indian,Shawarma,Other");
        let prompt = system_prompt(&categories);
        assert!(prompt.contains("Indian, Shawarma, Other"));
        assert!(prompt.contains("exactly one"));
    }

    #[test]
    fn user_prompt_includes_name_address_hints() {
        let prompt = user_prompt(&venue("Tandoori Palace"));
        assert!(prompt.contains("Name: Tandoori Palace"));
        assert!(prompt.contains("Address: 1 Main St"));
        assert!(prompt.contains("Types: restaurant, food"));
    }

    #[test]
    fn chat_response_parsing() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": " Indian \n"}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.trim(), "Indian");
    }

    #[test]
    fn unmatched_reply_maps_to_sentinel() {
        let categories = CategorySet::from_csv("Indian,Shawarma,Other");
        assert_eq!(categories.match_label("Sushi"), None);
        // classify_venue turns a None match into the sentinel
        assert_eq!(UNCLASSIFIED, "Unclassified");
    }
}
