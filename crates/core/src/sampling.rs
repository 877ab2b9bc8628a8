//! Session-scoped sampling.
//!
//! A sampling decision is drawn once per session id and reused for every
//! span of that session. The state lives in [`SamplerState`] owned by the
//! sampler instance, so separate agents never share decisions.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use uuid::Uuid;

pub const DEFAULT_SESSION_MAX_AGE: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_SESSION_INACTIVITY: Duration = Duration::from_secs(15 * 60);

/// Source of the current session identity.
pub trait SessionProvider: Send + Sync {
    fn session_id(&self) -> String;

    /// An explicit decision overrides the sampler's own draw.
    fn sampling_decision(&self) -> Option<bool> {
        None
    }
}

pub trait RandomSource: Send {
    /// Returns a value in `[0, 1]`.
    fn next_unit(&mut self) -> f64;
}

#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&mut self) -> f64 {
        rand::thread_rng().gen_range(0.0..=1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerState {
    pub probability: f64,
    pub session_id: Option<String>,
    pub decision: bool,
    pub sessions_evaluated: u64,
}

pub struct SessionSampler {
    state: SamplerState,
    random: Box<dyn RandomSource>,
}

impl SessionSampler {
    pub fn new(probability: f64) -> Self {
        Self::with_random(probability, Box::new(ThreadRandom))
    }

    pub fn with_random(probability: f64, random: Box<dyn RandomSource>) -> Self {
        Self {
            state: SamplerState {
                probability,
                session_id: None,
                decision: false,
                sessions_evaluated: 0,
            },
            random,
        }
    }

    pub fn state(&self) -> &SamplerState {
        &self.state
    }

    /// Returns whether spans of `session_id` should flow into the store.
    pub fn should_sample(&mut self, session_id: &str, explicit: Option<bool>) -> bool {
        if let Some(decision) = explicit {
            self.remember(session_id, decision);
            return decision;
        }

        if self.state.session_id.as_deref() == Some(session_id) {
            return self.state.decision;
        }

        let decision = self.draw();
        self.remember(session_id, decision);
        tracing::debug!(
            session_id,
            sampled = decision,
            probability = self.state.probability,
            "evaluated session sampling"
        );
        decision
    }

    fn draw(&mut self) -> bool {
        let p = self.state.probability;
        if !(0.0..=1.0).contains(&p) {
            return false;
        }
        if p == 1.0 {
            return true;
        }
        if p == 0.0 {
            return false;
        }
        self.random.next_unit() <= p
    }

    fn remember(&mut self, session_id: &str, decision: bool) {
        if self.state.session_id.as_deref() != Some(session_id) {
            self.state.session_id = Some(session_id.to_string());
            self.state.sessions_evaluated += 1;
        }
        self.state.decision = decision;
    }
}

/// Session provider that issues a random id and rotates it once the session
/// is older than `max_age` or has been idle longer than `inactivity`.
pub struct RotatingSession {
    max_age: Duration,
    inactivity: Duration,
    current: Mutex<SessionSlot>,
}

struct SessionSlot {
    id: String,
    started: Instant,
    last_seen: Instant,
}

impl Default for RotatingSession {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_MAX_AGE, DEFAULT_SESSION_INACTIVITY)
    }
}

impl RotatingSession {
    pub fn new(max_age: Duration, inactivity: Duration) -> Self {
        let now = Instant::now();
        Self {
            max_age,
            inactivity,
            current: Mutex::new(SessionSlot {
                id: new_session_id(),
                started: now,
                last_seen: now,
            }),
        }
    }

    pub fn session_id_at(&self, now: Instant) -> String {
        let mut slot = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let expired = now.saturating_duration_since(slot.started) > self.max_age
            || now.saturating_duration_since(slot.last_seen) > self.inactivity;
        if expired {
            slot.id = new_session_id();
            slot.started = now;
            tracing::info!(session_id = %slot.id, "started new session");
        }
        slot.last_seen = now;
        slot.id.clone()
    }
}

impl SessionProvider for RotatingSession {
    fn session_id(&self) -> String {
        self.session_id_at(Instant::now())
    }
}

/// Provider with a fixed id, handy for hosts that manage sessions themselves.
#[derive(Debug, Clone)]
pub struct StaticSession {
    pub id: String,
    pub decision: Option<bool>,
}

impl SessionProvider for StaticSession {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    fn sampling_decision(&self) -> Option<bool> {
        self.decision
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}
