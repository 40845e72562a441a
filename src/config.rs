use std::env;
use std::time::Duration;

use log::{debug, info};

const DEFAULT_CATEGORIES: &[&str] = &[
    "Indian", "Shawarma", "Lebanese", "Gulf", "Seafood", "Burger", "Other",
];

/// Label used when the model's reply matches nothing in the category set.
pub const UNCLASSIFIED: &str = "Unclassified";

/// The ordered set of allowed cuisine labels, fixed at startup.
#[derive(Debug, Clone)]
pub struct CategorySet {
    labels: Vec<String>,
}

impl CategorySet {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parse a comma-separated list, falling back to the built-in set when
    /// the input is empty or all-whitespace.
    pub fn from_csv(csv: &str) -> Self {
        let labels: Vec<String> = csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if labels.is_empty() {
            Self::default()
        } else {
            Self { labels }
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Match a model reply against the set: trimmed case-insensitive exact
    /// match first, then containment in either direction. `None` means the
    /// caller should fall back to the unclassified sentinel.
    pub fn match_label(&self, reply: &str) -> Option<&str> {
        let reply = reply.trim();
        if reply.is_empty() {
            return None;
        }
        let lower = reply.to_lowercase();
        for label in &self.labels {
            if label.to_lowercase() == lower {
                return Some(label);
            }
        }
        for label in &self.labels {
            let label_lower = label.to_lowercase();
            if lower.contains(&label_lower) || label_lower.contains(&lower) {
                return Some(label);
            }
        }
        None
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self {
            labels: DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Process-wide settings, read once from the environment at startup and
/// threaded explicitly into each pipeline stage.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub google_maps_key: String,
    pub openai_key: String,
    pub openai_model: String,
    pub categories: CategorySet,
    pub default_radius_m: f64,
    pub resolver_timeout: Duration,
    pub places_timeout: Duration,
    pub classify_timeout: Duration,
    pub max_redirect_hops: usize,
    pub max_result_pages: usize,
    pub classify_concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let google_maps_key = require_var("GOOGLE_MAPS_KEY")?;
        let openai_key = require_var("OPENAI_API_KEY")?;

        let config = AppConfig {
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0:8080"),
            google_maps_key,
            openai_key,
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            categories: CategorySet::from_csv(&env_or("CUISINE_CATEGORIES", "")),
            default_radius_m: parse_var("SEARCH_RADIUS_M", 1500.0)?,
            resolver_timeout: Duration::from_secs(parse_var("RESOLVER_TIMEOUT_SECS", 4)?),
            places_timeout: Duration::from_secs(parse_var("PLACES_TIMEOUT_SECS", 10)?),
            classify_timeout: Duration::from_secs(parse_var("CLASSIFY_TIMEOUT_SECS", 30)?),
            max_redirect_hops: parse_var("MAX_REDIRECT_HOPS", 5)?,
            max_result_pages: parse_var("MAX_RESULT_PAGES", 3)?,
            classify_concurrency: parse_var("CLASSIFY_CONCURRENCY", 4)?,
        };

        if config.default_radius_m <= 0.0 || !config.default_radius_m.is_finite() {
            return Err(format!(
                "SEARCH_RADIUS_M must be a positive number, got {}",
                config.default_radius_m
            ));
        }
        if config.classify_concurrency == 0 {
            return Err("CLASSIFY_CONCURRENCY must be at least 1".to_string());
        }

        debug!("Loaded categories: {:?}", config.categories.labels());
        info!(
            "Configuration loaded (maps key {}, model {})",
            mask_api_key(&config.google_maps_key),
            config.openai_model
        );
        Ok(config)
    }
}

fn require_var(name: &str) -> Result<String, String> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("{} must be set", name)),
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|e| format!("{} is not valid: {}", name, e)),
        _ => Ok(default),
    }
}

pub fn mask_api_key(key: &str) -> String {
    if key.len() > 5 {
        format!("{}{}", &key[..5], "*".repeat(key.len() - 5))
    } else {
        key.to_string()
    }
}
