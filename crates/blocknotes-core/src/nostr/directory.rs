//! NIP-05 style name → pubkey directory used to verify profiles.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::constants::NETWORK_TIMEOUT_SECS;
use crate::models::Verification;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("directory answered with status {0}")]
    Status(u16),
}

/// Resolves a display name to the hex pubkey registered for it.
pub trait DirectoryLookup: Send + Sync + 'static {
    /// `Ok(None)` when the directory answered but does not know the name
    fn lookup(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, DirectoryError>> + Send;
}

#[derive(Debug, Deserialize)]
struct NamesResponse {
    #[serde(default)]
    names: HashMap<String, String>,
}

/// HTTP directory serving `/.well-known/nostr.json?name=<name>`
#[derive(Debug, Clone)]
pub struct Nip05Directory {
    base_url: String,
    client: reqwest::Client,
}

impl Nip05Directory {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(NETWORK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl DirectoryLookup for Nip05Directory {
    async fn lookup(&self, name: &str) -> Result<Option<String>, DirectoryError> {
        let url = format!("{}/.well-known/nostr.json", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("name", name)])
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(DirectoryError::Status(status.as_u16()));
        }

        let body: NamesResponse = response.json().await?;
        Ok(body.names.get(name).cloned())
    }
}

/// Verified only when the directory maps the name to exactly `pubkey`.
/// Unknown names, other keys and failed lookups are all Unverified.
pub fn decide_verification(
    pubkey: &str,
    result: &Result<Option<String>, DirectoryError>,
) -> Verification {
    match result {
        Ok(Some(key)) if key.eq_ignore_ascii_case(pubkey) => Verification::Verified,
        _ => Verification::Unverified,
    }
}

/// Look `name` up and decide. A profile without a name cannot be verified.
pub async fn verify_name<D: DirectoryLookup>(
    directory: &D,
    name: Option<&str>,
    pubkey: &str,
) -> Verification {
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        return Verification::Unverified;
    };

    let result = directory.lookup(name).await;
    if let Err(e) = &result {
        tracing::debug!(name, pubkey, error = %e, "directory lookup failed");
    }
    decide_verification(pubkey, &result)
}
