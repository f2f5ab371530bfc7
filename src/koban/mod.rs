//! Koban CRM integration.
//!
//! This module provides:
//! - A pluggable HTTP transport ([`KobanTransport`], [`ReqwestTransport`])
//! - A client with per-call retry and response classification
//! - Payload builders for thirds, invoices, payments and products

mod client;
mod error;
mod retry_policy;
pub mod serializers;
mod transport;

pub use client::{KobanClient, KobanPayload};
pub use error::KobanError;
pub use retry_policy::RequestRetryPolicy;
pub use serializers::KobanSerializer;
pub use transport::{
    HttpMethod, KobanRequest, KobanResponse, KobanTransport, ReqwestTransport, TransportError,
};
