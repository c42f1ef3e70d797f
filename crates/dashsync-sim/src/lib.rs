//! Deterministic simulation of a dashboard sync session: seeded server
//! behaviour, injected faults, and a sequential model to compare against.

pub mod fault;
pub mod invariants;
pub mod ops;
pub mod oracle;
pub mod sim;

pub use fault::{FaultConfig, FaultStats};
pub use invariants::Violation;
pub use sim::Sim;
