//! Status classification and anti-flapping state machine
//!
//! Two layers, kept deliberately separate:
//!
//! - [`classifier`]: pure functions mapping one sample to per-parameter
//!   levels and a combined instantaneous status. No state, no clock.
//! - [`hysteresis`]: the per-server state machine deciding whether the
//!   *persisted* status actually changes, based on the classifier output,
//!   the recent-status ring buffer and elapsed time.

pub mod classifier;
pub mod hysteresis;

pub use classifier::{Classification, Condition, Level, ServerStatus};
pub use hysteresis::{HealthState, TransitionDecision};
