//! HTTP client - turns a request template into a timed outcome
//!
//! Nothing here returns an error to the caller: construction, transport
//! and body read failures become an [`Outcome`] with `error` set, so they travel through
//! the executor like any other result.

use std::time::{Duration, Instant};

use eyre::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::{RequestTemplate, Settings};

/// Why a request did not produce a response
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid method '{0}'")]
    InvalidMethod(String),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header name '{0}'")]
    InvalidHeaderName(String),

    #[error("invalid value for header '{0}'")]
    InvalidHeaderValue(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to read response body: {0}")]
    Body(reqwest::Error),
}

/// Result of one request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    /// Response status, absent when no response arrived
    pub status: Option<u16>,
    /// Failure description; set when the request failed or the body could
    /// not be read
    pub error: Option<String>,
    /// Time from send to response headers
    pub elapsed: Duration,
    /// Response body size
    pub bytes: u64,
}

impl Outcome {
    pub fn response(status: u16, elapsed: Duration, bytes: u64) -> Self {
        Self {
            status: Some(status),
            error: None,
            elapsed,
            bytes,
        }
    }

    pub fn failure(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: None,
            error: Some(error.into()),
            elapsed,
            bytes: 0,
        }
    }

    /// Status arrived but the body was cut short
    pub fn body_failure(status: u16, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: Some(status),
            error: Some(error.into()),
            elapsed,
            bytes: 0,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.status.is_none()
    }
}

/// Shared HTTP client; cheap to clone
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        debug!(timeout_ms = settings.timeout_ms, user_agent = %settings.user_agent, "HttpClient::new: called");
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Build a request from a template without sending it
    pub fn build_request(&self, template: &RequestTemplate) -> Result<reqwest::Request, RequestError> {
        let method = if template.method.is_empty() {
            Method::GET
        } else {
            Method::from_bytes(template.method.to_uppercase().as_bytes())
                .map_err(|_| RequestError::InvalidMethod(template.method.clone()))?
        };

        let url = Url::parse(&template.url).map_err(|e| RequestError::InvalidUrl {
            url: template.url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        for (name, values) in &template.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| RequestError::InvalidHeaderName(name.clone()))?;
            for value in values {
                let header_value =
                    HeaderValue::from_str(value).map_err(|_| RequestError::InvalidHeaderValue(name.clone()))?;
                headers.append(header_name.clone(), header_value);
            }
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = template.body_bytes() {
            builder = builder.body(body);
        }
        Ok(builder.build()?)
    }

    /// Send one request and time it
    pub async fn execute(&self, template: &RequestTemplate) -> Outcome {
        let request = match self.build_request(template) {
            Ok(request) => request,
            Err(e) => {
                debug!(url = %template.url, error = %e, "HttpClient::execute: could not build request");
                return Outcome::failure(e.to_string(), Duration::ZERO);
            }
        };

        let started = Instant::now();
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                let elapsed = started.elapsed();
                debug!(url = %template.url, error = %e, ?elapsed, "HttpClient::execute: request failed");
                return Outcome::failure(RequestError::Transport(e).to_string(), elapsed);
            }
        };
        let elapsed = started.elapsed();
        let status = response.status().as_u16();

        // Drain the body so the connection can be reused.
        let bytes = match response.bytes().await {
            Ok(body) => body.len() as u64,
            Err(e) => {
                debug!(url = %template.url, status, error = %e, "HttpClient::execute: failed to read body");
                return Outcome::body_failure(status, RequestError::Body(e).to_string(), elapsed);
            }
        };

        debug!(url = %template.url, status, ?elapsed, bytes, "HttpClient::execute: response");
        Outcome::response(status, elapsed, bytes)
    }
}
