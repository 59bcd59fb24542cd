use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::config::TrackingConfig;
use crate::model::{AlertPayload, PositionPayload};
use crate::reconcile::FeedPayload;

pub const INELIGIBLE_REASON: &str =
    "Live location is not available: this rental is not currently eligible for tracking.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("tracking forbidden for this association")]
    Forbidden,
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Decode(String),
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
}

impl FetchError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden)
    }

    /// Text for the inline banner shown over last-known data.
    pub fn user_message(&self) -> String {
        match self {
            Self::Forbidden => INELIGIBLE_REASON.to_string(),
            Self::Status(code) if *code >= 500 => {
                format!("Tracking service error (HTTP {code}). Showing last known data.")
            }
            Self::Status(code) => {
                format!("Tracking service refused the request (HTTP {code}). Showing last known data.")
            }
            Self::Transport(_) => {
                "Unable to reach the tracking service. Showing last known data.".to_string()
            }
            Self::Decode(_) => {
                "Received unreadable tracking data. Showing last known data.".to_string()
            }
            Self::InvalidBaseUrl(_) => "Tracking service address is misconfigured.".to_string(),
        }
    }
}

/// One polled endpoint. Implementations must not retry; the poller owns the cadence.
#[async_trait]
pub trait Feed: Send + Sync + 'static {
    type Payload: FeedPayload + Send + 'static;

    fn describe(&self) -> String;
    async fn fetch(&self) -> Result<Self::Payload, FetchError>;
}

/// Maps an HTTP answer to a payload. An empty body reads as JSON `null`.
pub fn classify_response<P: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<P, FetchError> {
    if status == StatusCode::FORBIDDEN {
        return Err(FetchError::Forbidden);
    }
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"null".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|err| FetchError::Decode(err.to_string()))
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &TrackingConfig) -> Result<Self, FetchError> {
        let base = Url::parse(&config.base_url)
            .map_err(|err| FetchError::InvalidBaseUrl(format!("{}: {err}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(FetchError::InvalidBaseUrl(config.base_url.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            base,
            token: config.api_token.clone(),
        })
    }

    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub async fn get_json<P: DeserializeOwned>(&self, segments: &[&str]) -> Result<P, FetchError> {
        let url = self.endpoint(segments);
        let mut request = self.http.get(url.clone()).header(ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "poll response");
        classify_response(status, &body)
    }
}

/// `GET /positions/{associationId}`: the vehicle attached to one rental.
pub struct PositionFeed {
    client: ApiClient,
    association_id: String,
}

impl PositionFeed {
    pub fn new(client: ApiClient, association_id: impl Into<String>) -> Self {
        Self {
            client,
            association_id: association_id.into(),
        }
    }
}

#[async_trait]
impl Feed for PositionFeed {
    type Payload = Option<PositionPayload>;

    fn describe(&self) -> String {
        format!("positions/{}", self.association_id)
    }

    async fn fetch(&self) -> Result<Self::Payload, FetchError> {
        self.client
            .get_json(&["positions", &self.association_id])
            .await
    }
}

/// `GET /positions`: every vehicle the caller may see.
pub struct FleetFeed {
    client: ApiClient,
}

impl FleetFeed {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Feed for FleetFeed {
    type Payload = Vec<PositionPayload>;

    fn describe(&self) -> String {
        "positions".to_string()
    }

    async fn fetch(&self) -> Result<Self::Payload, FetchError> {
        self.client.get_json(&["positions"]).await
    }
}

/// `GET /alerts`.
pub struct AlertFeed {
    client: ApiClient,
}

impl AlertFeed {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Feed for AlertFeed {
    type Payload = Vec<AlertPayload>;

    fn describe(&self) -> String {
        "alerts".to_string()
    }

    async fn fetch(&self) -> Result<Self::Payload, FetchError> {
        self.client.get_json(&["alerts"]).await
    }
}
