//! Flow controller - global pause/resume, reply delay and auto-pause.
//!
//! All state sits behind one mutex so admission decisions (pause check,
//! counter increment, threshold trip, backlog capture) are atomic with
//! respect to `pause`, `resume` and reconfiguration.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::domains::agents::lock::RoutingKey;
use crate::domains::chatrooms::models::Message;

/// Initial flow settings.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub auto_pause_enabled: bool,
    /// Agent-originated messages allowed between human turns.
    pub auto_pause_threshold: u32,
    pub reply_delay: Duration,
    /// Maximum number of (agent, chat) pairs held while paused.
    pub pending_capacity: usize,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            auto_pause_enabled: false,
            auto_pause_threshold: 10,
            reply_delay: Duration::ZERO,
            pending_capacity: 1024,
        }
    }
}

/// What to do with a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Go on to the lock and the reply.
    Proceed,
    /// Paused: stored as the pair's pending message.
    Captured,
    /// This message tripped auto-pause and was stored as pending.
    AutoPaused,
}

/// Snapshot of the flow state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatus {
    pub is_paused: bool,
    /// The current pause was triggered by the auto-pause policy.
    pub is_auto_pause: bool,
    pub auto_pause_enabled: bool,
    pub auto_pause_threshold: u32,
    pub message_count: u32,
    pub delay_ms: u64,
    pub pending: usize,
}

struct State {
    paused: bool,
    auto_paused: bool,
    auto_pause_enabled: bool,
    threshold: u32,
    counter: u32,
    delay: Duration,
    pending: HashMap<RoutingKey, Message>,
    capacity: usize,
}

impl State {
    fn capture(&mut self, key: &RoutingKey, message: &Message) {
        if self.pending.len() >= self.capacity && !self.pending.contains_key(key) {
            warn!(
                key = %key,
                capacity = self.capacity,
                "pending backlog full, dropping message"
            );
            return;
        }
        self.pending.insert(key.clone(), message.clone());
    }
}

pub struct FlowController {
    state: Mutex<State>,
}

impl FlowController {
    pub fn new(settings: FlowSettings) -> Self {
        Self {
            state: Mutex::new(State {
                paused: false,
                auto_paused: false,
                auto_pause_enabled: settings.auto_pause_enabled,
                threshold: settings.auto_pause_threshold.max(1),
                counter: 0,
                delay: settings.reply_delay,
                pending: HashMap::new(),
                capacity: settings.pending_capacity,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a delivered message may be answered now.
    ///
    /// A human message resets the auto-pause counter and is never counted.
    pub fn admit(&self, key: &RoutingKey, message: &Message, from_human: bool) -> Admission {
        let mut state = self.state();

        if from_human {
            state.counter = 0;
        }

        if state.paused {
            state.capture(key, message);
            return Admission::Captured;
        }

        if state.auto_pause_enabled && !from_human {
            state.counter += 1;
            if state.counter >= state.threshold {
                state.counter = 0;
                state.paused = true;
                state.auto_paused = true;
                state.capture(key, message);
                info!(key = %key, threshold = state.threshold, "auto-pause triggered");
                return Admission::AutoPaused;
            }
        }

        Admission::Proceed
    }

    /// Stop answering; later messages are captured as pending.
    pub fn pause(&self) {
        let mut state = self.state();
        state.paused = true;
        state.auto_paused = false;
    }

    /// Resume and hand back the captured backlog, one message per pair.
    pub fn resume(&self) -> Vec<(RoutingKey, Message)> {
        let mut state = self.state();
        state.paused = false;
        state.auto_paused = false;
        state.counter = 0;
        state.pending.drain().collect()
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    pub fn delay(&self) -> Duration {
        self.state().delay
    }

    /// Configure auto-pause. Resets the counter.
    pub fn set_auto_pause(&self, enabled: bool, threshold: Option<u32>) {
        let mut state = self.state();
        state.auto_pause_enabled = enabled;
        if let Some(threshold) = threshold {
            state.threshold = threshold.max(1);
        }
        state.counter = 0;
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Held messages, one per (agent, chat) pair.
    pub fn pending_messages(&self) -> Vec<(RoutingKey, Message)> {
        self.state()
            .pending
            .iter()
            .map(|(key, message)| (key.clone(), message.clone()))
            .collect()
    }

    pub fn status(&self) -> FlowStatus {
        let state = self.state();
        FlowStatus {
            is_paused: state.paused,
            is_auto_pause: state.auto_paused,
            auto_pause_enabled: state.auto_pause_enabled,
            auto_pause_threshold: state.threshold,
            message_count: state.counter,
            delay_ms: state.delay.as_millis() as u64,
            pending: state.pending.len(),
        }
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new(FlowSettings::default())
    }
}
