//! Threshold-filtered fan-out of signal events to live subscribers.
//!
//! Each subscriber holds a confidence threshold and a bounded view of
//! the most recent matching signals. Insert events are admitted only at
//! or above the threshold; update events are routed by id to every
//! subscriber whose view already holds the row, regardless of the
//! subscriber's current threshold. A threshold is fixed for the life of
//! a subscription; changing it means tearing the subscription down and
//! registering a fresh one with a new snapshot.

use crate::types::{ServerMessage, Signal, SignalEvent};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on the recent-signals view held per subscriber.
pub const RECENT_CAPACITY: usize = 10;

/// Bounded newest-first window of signals held for one subscriber.
///
/// Views are replaced wholesale on every change; a view handed out is
/// never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriberView {
    signals: Vec<Signal>,
}

impl SubscriberView {
    /// Build the initial view from a newest-first snapshot, truncated
    /// to capacity.
    pub fn from_snapshot(mut signals: Vec<Signal>) -> Self {
        signals.truncate(RECENT_CAPACITY);
        Self { signals }
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Most recent signal in the view. Inserts prepend and updates
    /// replace in place, so the head is always the newest entry.
    pub fn latest(&self) -> Option<&Signal> {
        self.signals.first()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// True when the view already holds a row with this id.
    pub fn holds(&self, id: Uuid) -> bool {
        self.signals.iter().any(|s| s.id == id)
    }

    /// New view with the signal prepended. An existing row with the
    /// same id is dropped first, then the oldest entries fall off the
    /// end to stay within capacity.
    pub fn with_inserted(&self, signal: Signal) -> Self {
        let mut signals = Vec::with_capacity(RECENT_CAPACITY);
        signals.push(signal.clone());
        signals.extend(
            self.signals
                .iter()
                .filter(|s| s.id != signal.id)
                .cloned(),
        );
        signals.truncate(RECENT_CAPACITY);
        Self { signals }
    }

    /// New view with the matching row replaced in place; positions of
    /// all entries are unchanged. Returns `None` when the id is not
    /// held, in which case the update is not for this subscriber.
    pub fn with_updated(&self, signal: &Signal) -> Option<Self> {
        if !self.holds(signal.id) {
            return None;
        }
        let signals = self
            .signals
            .iter()
            .map(|s| {
                if s.id == signal.id {
                    signal.clone()
                } else {
                    s.clone()
                }
            })
            .collect();
        Some(Self { signals })
    }
}

struct SubscriberContext {
    /// Inclusive minimum confidence for admitting new signals.
    min_confidence: f64,
    view: SubscriberView,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Fan-out hub keyed by subscriber id.
pub struct SubscriptionHub {
    subscribers: DashMap<Uuid, SubscriberContext>,
}

impl SubscriptionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: DashMap::new(),
        })
    }

    /// Register a subscriber at a confidence threshold with its initial
    /// snapshot. The snapshot is delivered immediately over `tx`,
    /// preceded by the subscription acknowledgement.
    pub fn register(
        &self,
        min_confidence: f64,
        snapshot: Vec<Signal>,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let view = SubscriberView::from_snapshot(snapshot);

        let _ = tx.send(ServerMessage::Subscribed { min_confidence });
        let _ = tx.send(ServerMessage::Snapshot {
            data: view.signals().to_vec(),
        });

        self.subscribers.insert(
            id,
            SubscriberContext {
                min_confidence,
                view,
                tx,
            },
        );

        debug!(
            "Subscriber {} registered at threshold {:.1} ({} total)",
            id,
            min_confidence,
            self.subscribers.len()
        );
        id
    }

    /// Remove a subscriber. Safe to call more than once.
    pub fn unregister(&self, id: Uuid) {
        if self.subscribers.remove(&id).is_some() {
            debug!(
                "Subscriber {} unregistered ({} remaining)",
                id,
                self.subscribers.len()
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Current view of one subscriber.
    pub fn view(&self, id: Uuid) -> Option<SubscriberView> {
        self.subscribers.get(&id).map(|c| c.view.clone())
    }

    /// Route one store event to every affected subscriber.
    ///
    /// Malformed rows are dropped here for everyone rather than pushed
    /// through to clients.
    pub fn dispatch(&self, event: &SignalEvent) {
        let signal = event.signal();
        if let Err(defect) = signal.validate() {
            warn!("Dropping malformed signal event {}: {}", signal.id, defect);
            return;
        }

        let mut dead = Vec::new();

        match event {
            SignalEvent::Insert(signal) => {
                for mut entry in self.subscribers.iter_mut() {
                    let key = *entry.key();
                    let ctx = entry.value_mut();
                    if signal.confidence_score < ctx.min_confidence {
                        continue;
                    }
                    ctx.view = ctx.view.with_inserted(signal.clone());
                    if ctx
                        .tx
                        .send(ServerMessage::SignalCreated {
                            data: signal.clone(),
                        })
                        .is_err()
                    {
                        dead.push(key);
                    }
                }
            }
            SignalEvent::Update(signal) => {
                for mut entry in self.subscribers.iter_mut() {
                    let key = *entry.key();
                    let ctx = entry.value_mut();
                    // Updates route by held id, not by threshold.
                    let Some(updated) = ctx.view.with_updated(signal) else {
                        continue;
                    };
                    ctx.view = updated;
                    if ctx
                        .tx
                        .send(ServerMessage::SignalResolved {
                            data: signal.clone(),
                        })
                        .is_err()
                    {
                        dead.push(key);
                    }
                }
            }
        }

        for id in dead {
            self.unregister(id);
        }
    }

    /// Drive the hub from the store's event stream until the store
    /// goes away.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<SignalEvent>) {
        info!("Subscription hub running");
        loop {
            match events.recv().await {
                Ok(event) => self.dispatch(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscription hub lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Store event stream closed, subscription hub stopping");
                    break;
                }
            }
        }
    }
}
