//! Relay capability probing over NIP-11.
//!
//! Relays publish an information document at their HTTP endpoint when asked
//! with `Accept: application/nostr+json`. The probe fetches it and checks
//! whether NIP-77 appears in `supported_nips`, so callers can skip relays
//! that would only answer a `NEG-OPEN` with a confused notice.

use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use url::Url;

use crate::error::{Result, SyncError};

const NEGENTROPY_NIP: u64 = 77;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The subset of a NIP-11 information document the probe reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayInformation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub software: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub supported_nips: Vec<u64>,
}

impl RelayInformation {
    pub fn supports_negentropy(&self) -> bool {
        self.supported_nips.contains(&NEGENTROPY_NIP)
    }
}

/// The NIP-11 information URL for a relay websocket URL: same host and
/// path, `ws` flipped to `http` and `wss` to `https`.
pub fn information_url(relay_url: &str) -> Result<Url> {
    let mut url = Url::parse(relay_url)?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => return Err(SyncError::InvalidScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| SyncError::InvalidScheme(relay_url.to_string()))?;
    Ok(url)
}

/// Fetch a relay's information document.
pub async fn probe_relay(client: &reqwest::Client, relay_url: &str) -> Result<RelayInformation> {
    let url = information_url(relay_url)?;
    let response = client
        .get(url)
        .header(ACCEPT, "application/nostr+json")
        .timeout(PROBE_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<RelayInformation>().await?)
}

/// Keep only the relays whose information document advertises negentropy
/// support. Probes run concurrently; a relay that cannot be probed or stays
/// silent about NIP-77 is dropped (the probe fails closed).
pub async fn filter_negentropy_relays(
    client: &reqwest::Client,
    relay_urls: &[String],
) -> Vec<String> {
    let probes = relay_urls.iter().map(|relay_url| async move {
        match probe_relay(client, relay_url).await {
            Ok(info) if info.supports_negentropy() => Some(relay_url.clone()),
            Ok(info) => {
                tracing::debug!(
                    relay = %relay_url,
                    software = info.software.as_deref().unwrap_or("unknown"),
                    "relay does not advertise negentropy support"
                );
                None
            }
            Err(error) => {
                tracing::debug!(relay = %relay_url, %error, "relay probe failed");
                None
            }
        }
    });

    futures::future::join_all(probes)
        .await
        .into_iter()
        .flatten()
        .collect()
}
