//! Streaming Module
//!
//! Paced delivery of token-by-token responses to the surface.
//!
//! - [`StreamSession`]: the state machine (idle → buffering → active → settled)
//! - [`SessionDriver`]: a task that owns one session and its timers
//! - [`StreamRoutes`]: route group turning stream envelopes into signals

mod driver;
mod routes;
mod session;

pub use driver::{DriverClosed, SessionDriver, SessionHandle, DEFAULT_SIGNAL_CAPACITY};
pub use routes::{StreamRoutes, STREAM_TYPES};
pub use session::{
    CancelPolicy, Phase, SessionOutcome, StreamSession, StreamSignal, StreamSnapshot,
    StreamingConfig, DEFAULT_DEBOUNCE, DEFAULT_QUIET_BUFFER,
};
