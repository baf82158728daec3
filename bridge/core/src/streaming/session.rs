//! Streaming session state machine
//!
//! One session per UI slot. Content arrives token by token; what the surface
//! is allowed to show (`display_content`) is paced in two phases:
//!
//! ```text
//!            start                quiet timer            end / error
//!   Idle ──────────► Buffering ───────────────► Active ─────────────► Settled
//!     ▲                 │  tokens accumulate,      │ tokens re-arm the     │
//!     │                 │  display untouched       │ debounce; its expiry  │
//!     │                 │                          │ copies buffer→display │
//!     └──── reset ──────┴──────────────────────────┴───────────────────────┘
//! ```
//!
//! Timer deadlines are stored inside the phase that owns them, so any
//! transition out of a phase drops its timers with it. A timer cannot fire
//! into a session that has moved on: there is nothing left to fire.
//!
//! Time is passed in by the caller. [`SessionDriver`](super::SessionDriver)
//! supplies the tokio clock and sleeps until [`StreamSession::next_deadline`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::messages::RequestId;

/// Default quiet-buffer period
pub const DEFAULT_QUIET_BUFFER: Duration = Duration::from_millis(5000);

/// Default trailing debounce period
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

// ============================================================================
// Configuration
// ============================================================================

/// What a cancellation does to the displayed content
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelPolicy {
    /// Leave `display_content` at its last paced value
    #[default]
    KeepPaced,
    /// Copy the full buffer to `display_content`, like completion
    Flush,
}

impl CancelPolicy {
    /// Config/env spelling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeepPaced => "keep-paced",
            Self::Flush => "flush",
        }
    }
}

impl fmt::Display for CancelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep-paced" | "keep_paced" | "keep" => Ok(Self::KeepPaced),
            "flush" => Ok(Self::Flush),
            other => Err(format!(
                "unknown cancel policy '{other}' (expected 'keep-paced' or 'flush')"
            )),
        }
    }
}

/// Pacing parameters for a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Initial period during which content is hidden
    pub quiet_buffer: Duration,
    /// Quiet gap required before a display update
    pub debounce: Duration,
    /// Cancellation flush behavior
    pub cancel_policy: CancelPolicy,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            quiet_buffer: DEFAULT_QUIET_BUFFER,
            debounce: DEFAULT_DEBOUNCE,
            cancel_policy: CancelPolicy::default(),
        }
    }
}

// ============================================================================
// States and signals
// ============================================================================

/// How a session ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionOutcome {
    /// The producer finished
    Completed,
    /// The user aborted
    Cancelled,
    /// The producer reported an error
    Failed {
        /// Error text from the producer
        error: String,
    },
}

/// Lifecycle phase, carrying the timers it owns
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No session
    Idle,
    /// Accumulating; display hidden until `quiet_until`
    Buffering {
        /// Quiet-buffer timer
        quiet_until: Instant,
    },
    /// Debounced display updates
    Active {
        /// Debounce timer, armed by the latest token
        flush_at: Option<Instant>,
    },
    /// Terminated; immutable until reset or a new start
    Settled {
        /// How it ended
        outcome: SessionOutcome,
    },
}

impl Phase {
    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Buffering { .. } => "buffering",
            Self::Active { .. } => "active",
            Self::Settled { .. } => "settled",
        }
    }

    fn is_open(&self) -> bool {
        matches!(self, Self::Buffering { .. } | Self::Active { .. })
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Buffering { quiet_until } => Some(*quiet_until),
            Self::Active { flush_at } => *flush_at,
            Self::Idle | Self::Settled { .. } => None,
        }
    }
}

/// An input to the session
///
/// Correlated signals carry the request id they belong to; `None` matches
/// whatever session is current.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamSignal {
    /// Begin a new session, replacing any current one
    Start {
        /// Correlation id of the new session
        request_id: Option<RequestId>,
    },
    /// Append a fragment
    Token {
        /// Owning session
        request_id: Option<RequestId>,
        /// Incremental text
        text: String,
    },
    /// Normal completion
    End {
        /// Owning session
        request_id: Option<RequestId>,
    },
    /// User abort
    Cancel {
        /// Owning session
        request_id: Option<RequestId>,
    },
    /// Producer failure
    Error {
        /// Owning session
        request_id: Option<RequestId>,
        /// Error text
        error: String,
    },
    /// Tear down the session
    Reset,
}

enum Event {
    Signal(StreamSignal),
    Timer,
}

// ============================================================================
// Snapshot
// ============================================================================

/// Observable projection consumed by rendering
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    /// Current session id
    pub request_id: Option<RequestId>,
    /// Paced content
    pub display_content: String,
    /// In the quiet-buffer phase
    pub is_buffering: bool,
    /// Session is open
    pub is_streaming: bool,
    /// Tokens received this session
    pub token_count: u32,
    /// Session start, wall clock
    pub started_at: Option<DateTime<Utc>>,
    /// Number of display updates this session
    pub display_revision: u64,
    /// Set once settled
    pub outcome: Option<SessionOutcome>,
}

// ============================================================================
// Session
// ============================================================================

/// Streaming session state machine
#[derive(Clone, Debug)]
pub struct StreamSession {
    config: StreamingConfig,
    phase: Phase,
    request_id: Option<RequestId>,
    buffer: String,
    display: String,
    display_revision: u64,
    token_count: u32,
    started_at: Option<DateTime<Utc>>,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new(StreamingConfig::default())
    }
}

impl StreamSession {
    /// Create an idle session
    #[must_use]
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            request_id: None,
            buffer: String::new(),
            display: String::new(),
            display_revision: 0,
            token_count: 0,
            started_at: None,
        }
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    /// Start (or restart) streaming
    pub fn start_streaming(&mut self, request_id: Option<RequestId>, now: Instant) -> bool {
        self.apply(StreamSignal::Start { request_id }, now)
    }

    /// Append a token to the current session
    pub fn append_token(&mut self, text: impl Into<String>, now: Instant) -> bool {
        self.apply(
            StreamSignal::Token {
                request_id: None,
                text: text.into(),
            },
            now,
        )
    }

    /// Complete the current session, forcing a final flush
    pub fn end_streaming(&mut self, now: Instant) -> bool {
        self.apply(StreamSignal::End { request_id: None }, now)
    }

    /// Cancel the current session; a no-op unless streaming
    pub fn cancel_streaming(&mut self, now: Instant) -> bool {
        self.apply(StreamSignal::Cancel { request_id: None }, now)
    }

    /// Tear down to idle
    pub fn reset(&mut self) -> bool {
        self.apply(StreamSignal::Reset, Instant::now())
    }

    /// Apply a signal; returns whether observable state changed
    pub fn apply(&mut self, signal: StreamSignal, now: Instant) -> bool {
        self.transition(Event::Signal(signal), now)
    }

    /// Fire any timer due at `now`; returns whether observable state changed
    pub fn tick(&mut self, now: Instant) -> bool {
        self.transition(Event::Timer, now)
    }

    /// Earliest armed timer, if any
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.phase.deadline()
    }

    // ------------------------------------------------------------------------
    // Transition function
    // ------------------------------------------------------------------------

    fn transition(&mut self, event: Event, now: Instant) -> bool {
        let before = self.phase.name();
        let changed = match event {
            Event::Signal(StreamSignal::Start { request_id }) => {
                self.clear();
                self.request_id = request_id;
                self.started_at = Some(Utc::now());
                self.phase = Phase::Buffering {
                    quiet_until: now + self.config.quiet_buffer,
                };
                true
            }
            Event::Signal(StreamSignal::Reset) => {
                let was_clear = self.phase == Phase::Idle && self.request_id.is_none();
                self.clear();
                !was_clear
            }
            Event::Signal(StreamSignal::Token { request_id, text }) => {
                self.correlates(request_id.as_ref()) && self.on_token(text, now)
            }
            Event::Signal(StreamSignal::End { request_id }) => {
                self.correlates(request_id.as_ref()) && self.settle(SessionOutcome::Completed, true)
            }
            Event::Signal(StreamSignal::Cancel { request_id }) => {
                let flush = self.config.cancel_policy == CancelPolicy::Flush;
                self.correlates(request_id.as_ref()) && self.settle(SessionOutcome::Cancelled, flush)
            }
            Event::Signal(StreamSignal::Error { request_id, error }) => {
                self.correlates(request_id.as_ref())
                    && self.settle(SessionOutcome::Failed { error }, true)
            }
            Event::Timer => self.fire_due(now),
        };

        if changed && before != self.phase.name() {
            debug!(
                request_id = ?self.request_id,
                from = before,
                to = self.phase.name(),
                tokens = self.token_count,
                "Stream session transition"
            );
        }
        changed
    }

    fn correlates(&self, request_id: Option<&RequestId>) -> bool {
        match (request_id, self.request_id.as_ref()) {
            (Some(incoming), Some(current)) if incoming != current => {
                debug!(incoming = %incoming, current = %current, "Ignoring signal for another session");
                false
            }
            _ => true,
        }
    }

    fn on_token(&mut self, text: String, now: Instant) -> bool {
        match self.phase {
            Phase::Buffering { .. } => {
                self.push(&text);
                true
            }
            Phase::Active { .. } => {
                self.push(&text);
                self.phase = Phase::Active {
                    flush_at: Some(now + self.config.debounce),
                };
                true
            }
            Phase::Idle | Phase::Settled { .. } => {
                debug!(phase = self.phase.name(), "Ignoring token outside an open session");
                false
            }
        }
    }

    fn settle(&mut self, outcome: SessionOutcome, flush: bool) -> bool {
        if !self.phase.is_open() {
            return false;
        }
        if flush {
            self.flush();
        }
        self.phase = Phase::Settled { outcome };
        true
    }

    fn fire_due(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Buffering { quiet_until } if now >= quiet_until => {
                self.phase = Phase::Active { flush_at: None };
                self.flush();
                true
            }
            Phase::Active {
                flush_at: Some(flush_at),
            } if now >= flush_at => {
                self.phase = Phase::Active { flush_at: None };
                self.flush();
                true
            }
            _ => false,
        }
    }

    fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.token_count = self.token_count.saturating_add(1);
    }

    /// Copy buffer to display; the buffer only grows, so display never shrinks
    fn flush(&mut self) -> bool {
        if self.display.len() == self.buffer.len() {
            return false;
        }
        self.display.clone_from(&self.buffer);
        self.display_revision += 1;
        true
    }

    fn clear(&mut self) {
        self.phase = Phase::Idle;
        self.request_id = None;
        self.buffer.clear();
        self.display.clear();
        self.display_revision = 0;
        self.token_count = 0;
        self.started_at = None;
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Paced content for display
    #[must_use]
    pub fn display_content(&self) -> &str {
        &self.display
    }

    /// Everything received so far
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// In the quiet-buffer phase
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        matches!(self.phase, Phase::Buffering { .. })
    }

    /// Session open (buffering or active)
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.phase.is_open()
    }

    /// Tokens received this session
    #[must_use]
    pub fn token_count(&self) -> u32 {
        self.token_count
    }

    /// Wall-clock start time
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Current correlation id
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Number of display updates this session
    #[must_use]
    pub fn display_revision(&self) -> u64 {
        self.display_revision
    }

    /// Pacing parameters
    #[must_use]
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Observable projection
    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            request_id: self.request_id.clone(),
            display_content: self.display.clone(),
            is_buffering: self.is_buffering(),
            is_streaming: self.is_streaming(),
            token_count: self.token_count,
            started_at: self.started_at,
            display_revision: self.display_revision,
            outcome: match &self.phase {
                Phase::Settled { outcome } => Some(outcome.clone()),
                _ => None,
            },
        }
    }
}
