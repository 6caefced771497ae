//! Cancellation flow orchestration: the step reducer and the engine that
//! keeps one session per user flow and drives its final submission.

pub mod engine;
pub mod gateway;
pub mod state_machine;

pub use engine::{FlowEngine, FlowSnapshot};
pub use gateway::CancellationGateway;
pub use state_machine::{FlowEvent, FlowState, Step};
