//! Statewright Graph
//!
//! This crate provides the executable form of a state machine definition.
//! A [`StateMachine`] is built once per definition version from a
//! [`StateMachineDef`](statewright_config::StateMachineDef) and a
//! [`StateRegistry`], then shared read-only by every execution.
//!
//! Key differences from `statewright-config`:
//! - Every state is a live [`State`] resolved through the registry
//! - Transitions are validated and indexed by (state, edge type)
//! - Child machines at any depth are addressable by id from the root
//! - Step types are checked against the phase categories they may appear in

mod error;
mod machine;
mod registry;
mod response;
mod state;

pub use error::{GraphError, StateError};
pub use machine::{StateMachine, Transition};
pub use registry::{StateRegistry, StateTypeMetadata};
pub use response::{ExecutionResponse, FailureType, ResponseData};
pub use state::{State, StateInfo};
