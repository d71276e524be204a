//! Orchestrator
//!
//! The agentic loop and the types a caller holds while a turn runs.

pub mod agentic_loop;
pub mod events;
pub mod handle;
pub mod step;

pub use agentic_loop::{AgentLoop, TurnRequest, MAX_STEPS_STOP_REASON};
pub use events::{dispatch_event, pump_events, TurnCallbacks};
pub use handle::{TurnHandle, TurnOutcome};
pub use step::AgentStep;
