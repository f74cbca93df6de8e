//! Multi-relay sync orchestration.
//!
//! `sync_with_relays` is the top of the stack: it seals one candidate set
//! per filter, runs a negotiation per relay and filter, unions the
//! resulting need/have sets, and optionally downloads the missing events.
//! One relay failing does not abort the others; only a total failure
//! surfaces as an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use nostr_sync::{DEFAULT_FRAME_SIZE_LIMIT, Event, EventId, Item, Storage};

use crate::error::{Result, SyncError};
use crate::probe;
use crate::session::{
    CancelHandle, NegotiationProgress, ProgressCallback, SessionConfig, SyncPhase, SyncSession,
};
use crate::transport::SyncTransport;

/// Observer for per-relay session failures, keyed by relay URL.
pub type RelayErrorCallback = Arc<dyn Fn(&str, &SyncError) + Send + Sync>;

/// Observer for per-relay progress snapshots, keyed by relay URL.
pub type RelayProgressCallback = Arc<dyn Fn(&str, &NegotiationProgress) + Send + Sync>;

/// Local persistence the orchestrator syncs against.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// The local `(timestamp, id)` candidates matching a filter.
    async fn candidate_items(&self, filter: &Value) -> Result<Vec<Item>>;

    /// Download the given events from a relay and persist them locally.
    ///
    /// Ids the relay fails to return are simply absent from the result;
    /// the orchestrator retries them against the next relay that has them.
    async fn fetch_and_cache(&self, relay_url: &str, ids: &[EventId]) -> Result<Vec<Event>>;
}

/// Opens one frame transport per relay.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, relay_url: &str) -> Result<Box<dyn SyncTransport>>;
}

/// Tuning for one `sync_with_relays` call.
#[derive(Clone)]
pub struct SyncOptions {
    pub relay_urls: Vec<String>,
    /// Download needed events after convergence.
    pub auto_fetch: bool,
    pub frame_size_limit: usize,
    /// Per-session negotiation deadline.
    pub timeout: Duration,
    /// Check NIP-11 documents first and skip relays without NIP-77.
    pub probe_relays: bool,
    pub cancel: CancelHandle,
    pub on_relay_error: Option<RelayErrorCallback>,
    pub on_progress: Option<RelayProgressCallback>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            relay_urls: Vec::new(),
            auto_fetch: true,
            frame_size_limit: DEFAULT_FRAME_SIZE_LIMIT,
            timeout: Duration::from_secs(30),
            probe_relays: false,
            cancel: CancelHandle::new(),
            on_relay_error: None,
            on_progress: None,
        }
    }
}

/// Aggregate outcome of a multi-relay sync.
#[derive(Debug, Default)]
pub struct SyncResult {
    /// Events downloaded during auto-fetch, empty when it is disabled.
    pub events: Vec<Event>,
    /// Ids at least one relay has and we lack.
    pub need: HashSet<EventId>,
    /// Ids we hold that at least one relay lacks.
    pub have: HashSet<EventId>,
}

struct RelayOutcome {
    need: HashSet<EventId>,
    have: HashSet<EventId>,
    rounds: usize,
}

/// Reconcile the local store against every configured relay.
///
/// Sessions run concurrently, one per relay, each covering every filter in
/// turn. Per-relay failures go to `on_relay_error`; the call itself errors
/// only when no relay succeeds.
pub async fn sync_with_relays(
    store: &dyn EventStore,
    transports: &dyn TransportFactory,
    filters: &[Value],
    options: &SyncOptions,
) -> Result<SyncResult> {
    let mut relays = options.relay_urls.clone();
    if options.probe_relays && !relays.is_empty() {
        let client = reqwest::Client::new();
        relays = probe::filter_negentropy_relays(&client, &relays).await;
        if relays.is_empty() {
            return Err(SyncError::UnsupportedByRelay(
                "no configured relay advertises negentropy support".to_string(),
            ));
        }
    }
    if relays.is_empty() || filters.is_empty() {
        return Ok(SyncResult::default());
    }

    // one sealed candidate set per filter, shared by every relay session
    let mut storages = Vec::with_capacity(filters.len());
    for filter in filters {
        storages.push(Storage::sealed_from(store.candidate_items(filter).await?));
    }

    let runs = relays.iter().map(|relay_url| {
        let storages = &storages;
        async move {
            let outcome =
                sync_one_relay(transports, relay_url, filters, storages, options).await;
            (relay_url.clone(), outcome)
        }
    });
    let results = futures::future::join_all(runs).await;

    let mut need = HashSet::new();
    let mut have = HashSet::new();
    let mut per_relay_need = Vec::new();
    let mut first_error = None;

    for (relay_url, outcome) in results {
        match outcome {
            Ok(relay_outcome) => {
                tracing::debug!(
                    relay = %relay_url,
                    rounds = relay_outcome.rounds,
                    need = relay_outcome.need.len(),
                    have = relay_outcome.have.len(),
                    "relay sync converged"
                );
                need.extend(relay_outcome.need.iter().copied());
                have.extend(relay_outcome.have.iter().copied());
                per_relay_need.push((relay_url, relay_outcome.need));
            }
            Err(error) => {
                tracing::warn!(relay = %relay_url, %error, "relay sync failed");
                if let Some(callback) = &options.on_relay_error {
                    callback(&relay_url, &error);
                }
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
    }

    if per_relay_need.is_empty() {
        if let Some(error) = first_error {
            return Err(error);
        }
    }

    let mut events = Vec::new();
    if options.auto_fetch && !need.is_empty() {
        events = fetch_needed(store, options, &per_relay_need, &need, &have).await;
    }

    Ok(SyncResult { events, need, have })
}

async fn sync_one_relay(
    transports: &dyn TransportFactory,
    relay_url: &str,
    filters: &[Value],
    storages: &[Storage],
    options: &SyncOptions,
) -> Result<RelayOutcome> {
    let transport = transports.open(relay_url).await?;

    let mut need = HashSet::new();
    let mut have = HashSet::new();
    let mut rounds = 0;

    for (filter, storage) in filters.iter().zip(storages) {
        let config = SessionConfig {
            filter: filter.clone(),
            frame_size_limit: options.frame_size_limit,
            timeout: options.timeout,
            on_progress: wrap_progress(relay_url, options.on_progress.as_ref()),
            cancel: options.cancel.clone(),
        };
        let session = SyncSession::new(transport.as_ref(), storage.clone(), config)?;
        let outcome = session.run().await?;
        need.extend(outcome.need);
        have.extend(outcome.have);
        rounds += outcome.rounds;
    }

    Ok(RelayOutcome { need, have, rounds })
}

/// Download needed events relay by relay, skipping ids an earlier relay
/// already delivered.
async fn fetch_needed(
    store: &dyn EventStore,
    options: &SyncOptions,
    per_relay_need: &[(String, HashSet<EventId>)],
    need: &HashSet<EventId>,
    have: &HashSet<EventId>,
) -> Vec<Event> {
    let mut remaining = need.clone();
    let mut events = Vec::new();

    for (relay_url, relay_need) in per_relay_need {
        let ids: Vec<EventId> = relay_need
            .iter()
            .filter(|id| remaining.contains(*id))
            .copied()
            .collect();
        if ids.is_empty() {
            continue;
        }

        if let Some(callback) = &options.on_progress {
            callback(
                relay_url,
                &NegotiationProgress {
                    phase: SyncPhase::Fetching,
                    round: 0,
                    need_count: need.len(),
                    have_count: have.len(),
                    message_size: 0,
                    timestamp: crate::session::unix_millis(),
                },
            );
        }

        match store.fetch_and_cache(relay_url, &ids).await {
            Ok(fetched) => {
                for event in &fetched {
                    if let Ok(id) = event.id_bytes() {
                        remaining.remove(&id);
                    }
                }
                events.extend(fetched);
            }
            Err(error) => {
                tracing::warn!(relay = %relay_url, %error, "event fetch failed");
                if let Some(callback) = &options.on_relay_error {
                    callback(relay_url, &error);
                }
            }
        }

        if remaining.is_empty() {
            break;
        }
    }

    events
}

fn wrap_progress(
    relay_url: &str,
    callback: Option<&RelayProgressCallback>,
) -> Option<ProgressCallback> {
    callback.map(|callback| {
        let callback = Arc::clone(callback);
        let relay_url = relay_url.to_string();
        let wrapped: ProgressCallback =
            Arc::new(move |progress| callback(&relay_url, progress));
        wrapped
    })
}
