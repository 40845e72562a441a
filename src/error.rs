use actix_web::http::StatusCode;
use thiserror::Error;

/// Which upstream service produced a provider-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GooglePlaces,
    OpenAi,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::GooglePlaces => write!(f, "Google Places"),
            Provider::OpenAi => write!(f, "OpenAI"),
        }
    }
}

/// Everything that can halt the pipeline for one request.
///
/// An unmatched classifier reply is not in here on purpose: that is a data
/// condition and maps to the "Unclassified" sentinel inside the classifier.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("no coordinates found in URL")]
    NoCoordinates,

    #[error("too many redirects while expanding link")]
    TooManyRedirects,

    #[error("search radius must be a positive number of meters, got {0}")]
    InvalidRadius(f64),

    #[error("{provider} rejected the configured API key")]
    ProviderAuth { provider: Provider },

    #[error("{provider} quota exceeded, try again later")]
    ProviderQuota { provider: Provider },

    #[error("{provider} returned a malformed response: {detail}")]
    MalformedResponse { provider: Provider, detail: String },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },
}

impl PipelineError {
    /// Short machine-readable tag for the JSON error body.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidUrl(_)
            | PipelineError::NoCoordinates
            | PipelineError::TooManyRedirects
            | PipelineError::InvalidRadius(_) => "input_error",
            PipelineError::ProviderAuth { .. } => "provider_auth",
            PipelineError::ProviderQuota { .. } => "provider_quota",
            PipelineError::MalformedResponse { .. } | PipelineError::Transport { .. } => {
                "provider_error"
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidUrl(_)
            | PipelineError::NoCoordinates
            | PipelineError::TooManyRedirects
            | PipelineError::InvalidRadius(_) => StatusCode::BAD_REQUEST,
            PipelineError::ProviderQuota { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::ProviderAuth { .. }
            | PipelineError::MalformedResponse { .. }
            | PipelineError::Transport { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Wrap a reqwest error, folding redirect-limit overruns into the
    /// input taxonomy so the user sees an actionable message.
    pub fn from_transport(provider: Provider, source: reqwest::Error) -> Self {
        if source.is_redirect() {
            PipelineError::TooManyRedirects
        } else {
            PipelineError::Transport { provider, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_map_to_bad_request() {
        let err = PipelineError::InvalidRadius(0.0);
        assert_eq!(err.kind(), "input_error");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn quota_maps_to_service_unavailable() {
        let err = PipelineError::ProviderQuota {
            provider: Provider::GooglePlaces,
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("Google Places"));
    }

    #[test]
    fn auth_maps_to_bad_gateway() {
        let err = PipelineError::ProviderAuth {
            provider: Provider::OpenAi,
        };
        assert_eq!(err.kind(), "provider_auth");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
