//! Integration Tests Module
//!
//! End-to-end turns against a scripted provider: event ordering, the step
//! cap, cancellation, retry waits, configuration loading and callback
//! dispatch. One suite drives a real vendor adapter against a mock server.

// Scripted provider and sample tools shared by the tests below
mod support;

// Full turns through the agentic loop
mod agent_loop_test;

// Cancellation mid-turn
mod cancellation_test;

// Rate-limit and transient retries across a turn
mod retry_test;

// Engine configuration files
mod config_test;

// Callback-style event consumption
mod callbacks_test;

// Multi-step turns through a mocked Gemini endpoint
mod provider_loop_test;
