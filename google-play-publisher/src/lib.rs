// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

mod access_token;
pub mod cli;
pub mod config;
pub mod edits_api;
mod service_account;
pub mod workflow;

use {
    reqwest::blocking::{Client, ClientBuilder, RequestBuilder, Response},
    serde_json::Value,
    std::{
        path::Path,
        sync::Mutex,
        time::{Duration, Instant},
    },
    thiserror::Error,
};

pub use crate::access_token::{
    AccessToken, ServiceAccountAssertion, ServiceAccountTokenEncoder, ANDROID_PUBLISHER_SCOPE,
};
pub use crate::service_account::{
    InvalidPemPrivateKey, InvalidServiceAccountKey, ServiceAccountKey, GOOGLE_OAUTH2_TOKEN_URL,
};

use crate::{access_token::CachedAccessToken, config::Config};

pub type Result<T> = anyhow::Result<T>;

/// Root of the Google Play Android Publisher API.
pub const GOOGLE_PLAY_API_ENDPOINT: &str = "https://androidpublisher.googleapis.com";

pub(crate) const DEFAULT_USER_AGENT: &str = concat!("play-publisher/", env!("CARGO_PKG_VERSION"));

/// A client for the Google Play Android Publisher API.
///
/// Only the edits endpoints needed to ship a bundle are implemented.
pub struct PlayPublisherClient {
    client: Client,
    endpoint: String,
    token_encoder: ServiceAccountTokenEncoder,
    token: Mutex<Option<CachedAccessToken>>,
}

impl PlayPublisherClient {
    /// Create a client from a service account key file and a loaded [Config].
    pub fn from_service_account_path(path: &Path, config: &Config) -> Result<Self> {
        let key = ServiceAccountKey::from_json_path(path)?;
        Self::with_options(key.try_into()?, &config.endpoint, &config.user_agent)
    }

    /// Create a new client to the Android Publisher API.
    pub fn new(token_encoder: ServiceAccountTokenEncoder) -> Result<Self> {
        Self::with_options(token_encoder, GOOGLE_PLAY_API_ENDPOINT, DEFAULT_USER_AGENT)
    }

    /// Create a client talking to a non-default endpoint.
    pub fn with_options(
        token_encoder: ServiceAccountTokenEncoder,
        endpoint: &str,
        user_agent: &str,
    ) -> Result<Self> {
        // The blocking client defaults to a 30 second timeout, which large
        // bundle uploads exceed.
        let client = ClientBuilder::default()
            .user_agent(user_agent)
            .timeout(None::<Duration>)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token_encoder,
            token: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Obtain a bearer token, fetching a new one if the cached one is about to expire.
    pub fn get_token(&self) -> Result<String> {
        let mut token = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(cached) = token.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(cached.value().to_string());
        }

        let obtained_at = Instant::now();
        let fresh = CachedAccessToken::new(self.request_access_token()?, obtained_at);
        let value = fresh.value().to_string();
        token.replace(fresh);

        Ok(value)
    }

    pub fn send_request(&self, request: RequestBuilder) -> Result<Response> {
        let request = request.build()?;
        let method = request.method().to_string();
        let url = request.url().to_string();

        log::debug!("{} {}", method, url);

        let response = self.client.execute(request)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.bytes()?;

            Err(GooglePlayError {
                method,
                url,
                status,
                message: error_message(body.as_ref())?,
            }
            .into())
        }
    }
}

/// Render an error response body for humans.
fn error_message(body: &[u8]) -> Result<String> {
    Ok(
        if let Ok(value) = serde_json::from_slice::<Value>(body) {
            serde_json::to_string_pretty(&value)?
        } else {
            String::from_utf8_lossy(body).into()
        },
    )
}

#[derive(Clone, Debug, Error)]
#[error("google play error:\n{method} {url} ({status})\n{message}")]
pub struct GooglePlayError {
    method: String,
    url: String,
    status: u16,
    message: String,
}
