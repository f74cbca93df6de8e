//! One sync negotiation against one relay.
//!
//! A [`SyncSession`] owns the protocol state machine: it opens the
//! negotiation, feeds inbound `NEG-MSG` frames to the reconciler, sends the
//! replies, and resolves to the need/have sets once the ranges settle. The
//! whole negotiation runs under a single deadline and can be cancelled from
//! another task through a [`CancelHandle`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::Notify;

use nostr_sync::{
    DEFAULT_FRAME_SIZE_LIMIT, EventId, NegClose, NegMsg, NegOpen, ProtocolError,
    ReconcileConfig, Reconciler, Storage,
};

use crate::error::{Result, SyncError};
use crate::transport::{ClientFrame, RelayFrame, SyncTransport};

/// Notice substrings that relays without negentropy support are known to
/// produce in response to a `NEG-OPEN`.
const UNSUPPORTED_NOTICE_PATTERNS: &[&str] = &[
    "unsupported",
    "unknown msg",
    "unknown message",
    "unrecognized",
    "bad msg",
    "bad message",
    "invalid message",
    "negentropy disabled",
    "negentropy not supported",
];

fn notice_signals_unsupported(notice: &str) -> bool {
    let lowered = notice.to_lowercase();
    UNSUPPORTED_NOTICE_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Cooperative cancellation flag shared between a session and its owner.
///
/// Cloning yields another handle to the same flag. `cancel` is idempotent;
/// every waiter wakes at most once and the flag never resets.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any task, any number of times.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested.
    pub async fn wait(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Where a negotiation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// `NEG-OPEN` sent, waiting for the first relay message.
    Initiating,
    /// Exchanging range refinements.
    Reconciling,
    /// Converged, closing the subscription.
    Closing,
    /// Downloading needed events after convergence.
    Fetching,
}

/// A progress snapshot, emitted once per protocol step.
#[derive(Debug, Clone)]
pub struct NegotiationProgress {
    pub phase: SyncPhase,
    /// Completed reconciliation rounds so far.
    pub round: usize,
    pub need_count: usize,
    pub have_count: usize,
    /// Encoded size of the message just sent, if any.
    pub message_size: usize,
    /// Unix milliseconds at the time of the snapshot.
    pub timestamp: u64,
}

/// Observer for [`NegotiationProgress`] snapshots.
pub type ProgressCallback = Arc<dyn Fn(&NegotiationProgress) + Send + Sync>;

/// Per-session tuning.
#[derive(Clone)]
pub struct SessionConfig {
    /// Filter forwarded in the `NEG-OPEN` frame.
    pub filter: Value,
    /// Cap on encoded message size, enforced in both directions.
    pub frame_size_limit: usize,
    /// Deadline for the whole negotiation.
    pub timeout: Duration,
    pub on_progress: Option<ProgressCallback>,
    pub cancel: CancelHandle,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter: Value::Object(serde_json::Map::new()),
            frame_size_limit: DEFAULT_FRAME_SIZE_LIMIT,
            timeout: Duration::from_secs(30),
            on_progress: None,
            cancel: CancelHandle::new(),
        }
    }
}

/// What a finished negotiation produced.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Ids the relay has that we lack.
    pub need: HashSet<EventId>,
    /// Ids we have that the relay lacks.
    pub have: HashSet<EventId>,
    /// Reconciliation rounds it took to converge.
    pub rounds: usize,
}

/// The initiator side of one negotiation.
pub struct SyncSession<'a> {
    transport: &'a dyn SyncTransport,
    reconciler: Reconciler,
    subscription_id: String,
    config: SessionConfig,
    round: usize,
}

impl<'a> SyncSession<'a> {
    /// Build a session over a sealed storage.
    pub fn new(
        transport: &'a dyn SyncTransport,
        storage: Storage,
        config: SessionConfig,
    ) -> Result<Self> {
        let reconciler = Reconciler::new(
            storage,
            ReconcileConfig {
                frame_size_limit: config.frame_size_limit,
                ..ReconcileConfig::default()
            },
        )?;
        let subscription_id = format!("neg-{:08x}", rand::random::<u32>());
        Ok(Self {
            transport,
            reconciler,
            subscription_id,
            config,
            round: 0,
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Run the negotiation to completion.
    ///
    /// Resolves when the ranges settle, the deadline passes, the relay turns
    /// the negotiation down, or the session is cancelled. On timeout and
    /// cancellation a best-effort `NEG-CLOSE` is sent so the relay can drop
    /// its state.
    pub async fn run(self) -> Result<SessionOutcome> {
        let transport = self.transport;
        let subscription_id = self.subscription_id.clone();
        let cancel = self.config.cancel.clone();
        let deadline = self.config.timeout;

        tokio::select! {
            () = cancel.wait() => {
                let close = ClientFrame::Close(NegClose::new(subscription_id));
                let _ = transport.send(close).await;
                Err(SyncError::Cancelled)
            }
            outcome = tokio::time::timeout(deadline, self.drive()) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    let close = ClientFrame::Close(NegClose::new(subscription_id));
                    let _ = transport.send(close).await;
                    Err(SyncError::Timeout(deadline))
                }
            }
        }
    }

    async fn drive(mut self) -> Result<SessionOutcome> {
        let initial = self.reconciler.initial_message()?;
        self.report(SyncPhase::Initiating, initial.encode().len());
        tracing::debug!(
            subscription_id = %self.subscription_id,
            items = self.reconciler.storage().len(),
            "opening sync negotiation"
        );
        self.transport
            .send(ClientFrame::Open(NegOpen::new(
                self.subscription_id.clone(),
                self.config.filter.clone(),
                &initial,
            )))
            .await?;

        loop {
            let Some(frame) = self.transport.recv().await? else {
                return Err(SyncError::TransportClosed);
            };

            match frame {
                RelayFrame::Message(msg) if msg.subscription_id == self.subscription_id => {
                    if let Some(outcome) = self.step(&msg).await? {
                        return Ok(outcome);
                    }
                }

                RelayFrame::Error(err) if err.subscription_id == self.subscription_id => {
                    tracing::warn!(
                        subscription_id = %self.subscription_id,
                        reason = %err.reason,
                        "relay rejected the negotiation"
                    );
                    return Err(SyncError::Relay(err.reason));
                }

                RelayFrame::Notice(notice) => {
                    if notice_signals_unsupported(&notice) {
                        return Err(SyncError::UnsupportedByRelay(notice));
                    }
                    tracing::debug!(notice, "ignoring unrelated relay notice");
                }

                // frames addressed to some other subscription
                RelayFrame::Message(_) | RelayFrame::Error(_) => {}
            }
        }
    }

    /// Process one inbound `NEG-MSG`. Returns the outcome once converged.
    async fn step(&mut self, msg: &NegMsg) -> Result<Option<SessionOutcome>> {
        let size = msg.message.len() / 2;
        if self.config.frame_size_limit != 0 && size > self.config.frame_size_limit {
            return Err(SyncError::Protocol(ProtocolError::FrameTooLarge {
                size,
                limit: self.config.frame_size_limit,
            }));
        }

        let incoming = msg.decode_message()?;
        self.round += 1;

        match self.reconciler.reconcile(&incoming)? {
            Some(reply) => {
                self.report(SyncPhase::Reconciling, reply.encode().len());
                self.transport
                    .send(ClientFrame::Message(NegMsg::new(
                        self.subscription_id.clone(),
                        &reply,
                    )))
                    .await?;
                Ok(None)
            }
            None => {
                self.report(SyncPhase::Closing, 0);
                self.transport
                    .send(ClientFrame::Close(NegClose::new(
                        self.subscription_id.clone(),
                    )))
                    .await?;
                tracing::debug!(
                    subscription_id = %self.subscription_id,
                    rounds = self.round,
                    need = self.reconciler.need().len(),
                    have = self.reconciler.have().len(),
                    "negotiation converged"
                );
                Ok(Some(SessionOutcome {
                    need: self.reconciler.need().clone(),
                    have: self.reconciler.have().clone(),
                    rounds: self.round,
                }))
            }
        }
    }

    fn report(&self, phase: SyncPhase, message_size: usize) {
        if let Some(callback) = &self.config.on_progress {
            callback(&NegotiationProgress {
                phase,
                round: self.round,
                need_count: self.reconciler.need().len(),
                have_count: self.reconciler.have().len(),
                message_size,
                timestamp: unix_millis(),
            });
        }
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_notice_detection() {
        struct Case {
            notice: &'static str,
            unsupported: bool,
        }

        let cases = vec![
            Case {
                notice: "ERROR: bad msg: negentropy disabled",
                unsupported: true,
            },
            Case {
                notice: "error: bad message",
                unsupported: true,
            },
            Case {
                notice: "unknown msg type",
                unsupported: true,
            },
            Case {
                notice: "unsupported protocol: NEG-OPEN",
                unsupported: true,
            },
            Case {
                notice: "negentropy not supported",
                unsupported: true,
            },
            Case {
                notice: "NEG-OPEN is unsupported on this relay",
                unsupported: true,
            },
            Case {
                notice: "unrecognized frame type",
                unsupported: true,
            },
            Case {
                notice: "negentropy disabled by operator",
                unsupported: true,
            },
            Case {
                notice: "rate limited, slow down",
                unsupported: false,
            },
            Case {
                notice: "restarting in 5 minutes",
                unsupported: false,
            },
        ];

        for case in cases {
            assert_eq!(
                notice_signals_unsupported(case.notice),
                case.unsupported,
                "misclassified notice: {}",
                case.notice
            );
        }
    }

    #[tokio::test]
    async fn cancel_handle_is_idempotent() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());

        // waiting after the fact resolves immediately
        handle.wait().await;

        let clone = handle.clone();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_wakes_a_parked_waiter() {
        let handle = CancelHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.wait().await });

        tokio::task::yield_now().await;
        handle.cancel();
        task.await.unwrap();
    }
}
