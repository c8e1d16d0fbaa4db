//! Token bookkeeping for backend notifications, plus the gate that silences them.
//!
//! Every handler registered through [`EventSubscriptionManager`] first asks the shared
//! [`EventGate`] whether it may run. The gate rejects everything while a teardown is
//! in progress, and rejects handlers registered under an older player generation
//! forever. Notifications that were already in flight when a player was replaced
//! therefore never observe the new player's state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::audio::graph::{AudioGraph, QuantumHandler};
use crate::backend::{
    MediaPlayer, PlayerEvent, PlayerEventHandler, PlayerEventKind, SubscriptionToken,
};
use crate::error::Result;

/// Teardown flag plus player generation counter.
#[derive(Debug, Default)]
pub struct EventGate {
    ignore: AtomicBool,
    generation: AtomicU64,
}

impl EventGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every notification until [`open`](Self::open).
    pub fn close(&self) {
        self.ignore.store(true, Ordering::SeqCst);
    }

    pub fn open(&self) {
        self.ignore.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.ignore.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a new generation; handlers of earlier ones are rejected from now on.
    pub fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn admits(&self, generation: u64) -> bool {
        !self.is_closed() && self.generation() == generation
    }
}

/// Which notification a subscription is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Player(PlayerEventKind),
    QuantumStarted,
}

enum EventSource {
    Player(Arc<dyn MediaPlayer>),
    Graph(Arc<dyn AudioGraph>),
}

struct Subscription {
    source: EventSource,
    token: SubscriptionToken,
}

/// Holds `(source, token)` for every live subscription so each can be detached once.
pub struct EventSubscriptionManager {
    gate: Arc<EventGate>,
    subscriptions: HashMap<EventKind, Subscription>,
}

impl EventSubscriptionManager {
    pub fn new(gate: Arc<EventGate>) -> Self {
        Self {
            gate,
            subscriptions: HashMap::new(),
        }
    }

    pub fn gate(&self) -> &Arc<EventGate> {
        &self.gate
    }

    /// Attach `handler` to every player notification under the current generation.
    ///
    /// Either all six subscriptions are made or none remain.
    pub fn subscribe_player(
        &mut self,
        player: &Arc<dyn MediaPlayer>,
        handler: PlayerEventHandler,
    ) -> Result<()> {
        if !self.subscriptions.is_empty() {
            log::warn!(
                "Subscribing with {} subscriptions still attached; detaching them first",
                self.subscriptions.len()
            );
            self.unsubscribe_all();
        }

        let generation = self.gate.generation();
        for &kind in PlayerEventKind::ALL {
            let gate = self.gate.clone();
            let inner = handler.clone();
            let gated: PlayerEventHandler =
                Arc::new(move |sender: &dyn MediaPlayer, event: &PlayerEvent| {
                    if !gate.admits(generation) {
                        log::trace!("Dropped {:?} from generation {generation}", event.kind());
                        return;
                    }
                    inner(sender, event);
                });
            match player.subscribe(kind, gated) {
                Ok(token) => {
                    self.subscriptions.insert(
                        EventKind::Player(kind),
                        Subscription {
                            source: EventSource::Player(player.clone()),
                            token,
                        },
                    );
                }
                Err(e) => {
                    log::error!("Failed to subscribe to {kind:?}: {e}");
                    self.unsubscribe_all();
                    return Err(e.into());
                }
            }
        }
        log::debug!("Attached player notifications for generation {generation}");
        Ok(())
    }

    /// Attach `handler` to the graph's quantum-started notification.
    pub fn subscribe_quantum(
        &mut self,
        graph: &Arc<dyn AudioGraph>,
        handler: QuantumHandler,
    ) -> Result<()> {
        if let Some(previous) = self.subscriptions.remove(&EventKind::QuantumStarted) {
            detach(EventKind::QuantumStarted, previous);
        }
        let generation = self.gate.generation();
        let gate = self.gate.clone();
        let gated: QuantumHandler = Arc::new(move || {
            if gate.admits(generation) {
                handler();
            }
        });
        let token = graph.subscribe_quantum_started(gated)?;
        self.subscriptions.insert(
            EventKind::QuantumStarted,
            Subscription {
                source: EventSource::Graph(graph.clone()),
                token,
            },
        );
        Ok(())
    }

    /// Detach every subscription. Returns how many were detached.
    pub fn unsubscribe_all(&mut self) -> usize {
        let count = self.subscriptions.len();
        for (kind, subscription) in self.subscriptions.drain() {
            detach(kind, subscription);
        }
        count
    }

    pub fn is_subscribed(&self, kind: EventKind) -> bool {
        self.subscriptions.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

fn detach(kind: EventKind, subscription: Subscription) {
    let result = match (&subscription.source, kind) {
        (EventSource::Player(player), EventKind::Player(k)) => {
            player.unsubscribe(k, subscription.token)
        }
        (EventSource::Graph(graph), _) => graph.unsubscribe_quantum_started(subscription.token),
        (EventSource::Player(_), EventKind::QuantumStarted) => return,
    };
    if let Err(e) = result {
        log::warn!("Failed to detach {kind:?}: {e}");
    }
}

impl Drop for EventSubscriptionManager {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}
