use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skribly_core::events::{ServerEvent, TimerUpdateMsg};

use crate::broadcast::Broadcaster;
use crate::registry::SharedRegistry;

/// Which phase a room timer is counting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    WordSelection,
    Drawing,
    Results,
    Intermission,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::WordSelection => "word_selection",
            TimerKind::Drawing => "drawing",
            TimerKind::Results => "results",
            TimerKind::Intermission => "intermission",
        }
    }
}

/// Natural expiry of a room timer, delivered to the engine worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerExpiry {
    pub room_id: String,
    pub kind: TimerKind,
}

struct ActiveTimer {
    kind: TimerKind,
    generation: u64,
    started: Instant,
    duration_secs: u64,
    cancel: CancellationToken,
}

/// Per-room countdown timers. At most one timer is active per room;
/// starting a new one cancels its predecessor. Ticks broadcast
/// `timer_update` at 1 Hz; natural expiry is handed off to a dedicated
/// worker through a channel, never run on the tick task itself.
///
/// Cancellation contract: the expiry message is queued only if the timer's
/// entry is still present with a matching generation, checked under the
/// same mutex `stop()` removes entries with — a cancelled timer can never
/// fire.
pub struct TimerService {
    registry: SharedRegistry,
    broadcaster: Arc<Broadcaster>,
    expiry_tx: mpsc::UnboundedSender<TimerExpiry>,
    active: Mutex<HashMap<String, ActiveTimer>>,
    next_generation: AtomicU64,
}

impl TimerService {
    pub fn new(
        registry: SharedRegistry,
        broadcaster: Arc<Broadcaster>,
    ) -> (Self, mpsc::UnboundedReceiver<TimerExpiry>) {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                broadcaster,
                expiry_tx,
                active: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            },
            expiry_rx,
        )
    }

    /// Start (or replace) the room's timer.
    pub fn start(self: &Arc<Self>, room_id: &str, duration_secs: u64, kind: TimerKind) {
        let cancel = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut active = self.active.lock().expect("timer lock");
            let previous = active.insert(
                room_id.to_string(),
                ActiveTimer {
                    kind,
                    generation,
                    started: Instant::now(),
                    duration_secs,
                    cancel: cancel.clone(),
                },
            );
            if let Some(prev) = previous {
                prev.cancel.cancel();
                tracing::debug!(
                    room = %room_id,
                    replaced = prev.kind.as_str(),
                    with = kind.as_str(),
                    "Replaced room timer"
                );
            }
        }
        tracing::debug!(room = %room_id, kind = kind.as_str(), duration_secs, "Started timer");

        let svc = Arc::clone(self);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            svc.run(room_id, duration_secs, kind, generation, cancel).await;
        });
    }

    /// Cancel the room's timer, if any. The pending expiry will not fire.
    pub fn stop(&self, room_id: &str) -> bool {
        let mut active = self.active.lock().expect("timer lock");
        if let Some(timer) = active.remove(room_id) {
            timer.cancel.cancel();
            tracing::debug!(room = %room_id, kind = timer.kind.as_str(), "Stopped timer");
            true
        } else {
            false
        }
    }

    /// Seconds left on the room's timer; 0 when none is active.
    pub fn remaining(&self, room_id: &str) -> u64 {
        let active = self.active.lock().expect("timer lock");
        active.get(room_id).map_or(0, |t| {
            t.duration_secs.saturating_sub(t.started.elapsed().as_secs())
        })
    }

    pub fn active_kind(&self, room_id: &str) -> Option<TimerKind> {
        let active = self.active.lock().expect("timer lock");
        active.get(room_id).map(|t| t.kind)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("timer lock").len()
    }

    async fn run(
        &self,
        room_id: String,
        duration_secs: u64,
        kind: TimerKind,
        generation: u64,
        cancel: CancellationToken,
    ) {
        let mut remaining = duration_secs;
        while remaining > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {},
            }
            remaining -= 1;

            let players = {
                let registry = self.registry.read().await;
                registry.get_room(&room_id).map(|r| r.players)
            };
            let Some(players) = players else {
                // Room vanished mid-run; terminate silently.
                self.retire(&room_id, generation);
                return;
            };

            if remaining > 0 {
                self.broadcaster.to_sessions(
                    &players,
                    &ServerEvent::TimerUpdate(TimerUpdateMsg {
                        time_remaining: remaining,
                        phase: kind.as_str().to_string(),
                        room_id: room_id.clone(),
                    }),
                );
            }
        }

        if self.retire(&room_id, generation) {
            let _ = self.expiry_tx.send(TimerExpiry { room_id, kind });
        }
    }

    /// Remove this task's entry if it is still the active one. Returns
    /// whether the entry was ours (i.e. we were not cancelled/replaced).
    fn retire(&self, room_id: &str, generation: u64) -> bool {
        let mut active = self.active.lock().expect("timer lock");
        match active.get(room_id) {
            Some(timer) if timer.generation == generation => {
                active.remove(room_id);
                true
            },
            _ => false,
        }
    }
}
