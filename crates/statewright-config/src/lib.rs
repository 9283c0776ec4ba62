//! Statewright Config
//!
//! This crate contains the serializable configuration types for statewright.
//! These types represent state machine definitions before they are built into
//! an executable graph by `statewright-graph`, plus the tuning knobs of the
//! execution engine.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `statewright run machine.json`)
//! - Database storage (as JSON blobs)

mod edge;
mod enums;
mod error;
mod machine;
mod settings;

pub use edge::TransitionDef;
pub use enums::{ErrorStrategy, TransitionType};
pub use error::ConfigError;
pub use machine::{StateDef, StateMachineDef};
pub use settings::{EngineSettings, RetryPolicy};
