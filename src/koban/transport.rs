//! HTTP transport used by the Koban client.
//!
//! The client only sees [`KobanTransport`], so tests can swap the network
//! for a recording fake.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::config::KobanSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Outbound request, with a fully built URL.
#[derive(Debug, Clone, PartialEq)]
pub struct KobanRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

impl KobanRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// Raw response, before any classification.
#[derive(Debug, Clone, PartialEq)]
pub struct KobanResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl KobanResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json; charset=utf-8".to_string()),
            body: body.to_string().into_bytes(),
        }
    }

    pub fn pdf(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some("application/pdf".to_string()),
            body: body.into(),
        }
    }
}

/// Failure below HTTP: nothing usable came back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait KobanTransport: Send + Sync {
    async fn send(&self, request: KobanRequest) -> Result<KobanResponse, TransportError>;
}

/// Production transport backed by reqwest.
///
/// Both API credentials travel as default headers on every request. TLS
/// certificate verification stays on.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(settings: &KobanSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut api_key = HeaderValue::from_str(&settings.api_key)?;
        api_key.set_sensitive(true);
        let mut user_key = HeaderValue::from_str(&settings.user_key)?;
        user_key.set_sensitive(true);
        headers.insert(HeaderName::from_static("x-ncapi"), api_key);
        headers.insert(HeaderName::from_static("x-ncuser"), user_key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl KobanTransport for ReqwestTransport {
    async fn send(&self, request: KobanRequest) -> Result<KobanResponse, TransportError> {
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(KobanResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
