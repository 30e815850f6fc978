// src/utils/http.rs

//! HTTP client utilities.

use reqwest::Client;

use crate::error::Result;
use crate::models::IndexConfig;

/// Create the long-lived client used by the index sink.
///
/// The timeout bounds every request so one stalled call cannot hang the loop.
pub fn create_async_client(config: &IndexConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .gzip(true)
        .build()?;
    Ok(client)
}
