//! Statewright Context
//!
//! An [`ExecutionContext`] is the read model a state sees while it runs. It
//! is rebuilt for every attempt from the persisted
//! [`StateExecutionInstance`](statewright_store::StateExecutionInstance) and
//! never written back.
//!
//! # Expression context
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ currentStep            name, display name, type, retries   │
//! │ <display_name>         per-state results (normalized key)  │
//! │ workflow/service/env…  context elements, oldest first      │
//! │ context.<name>         published outputs                   │
//! │ secrets.<name>         resolved on first access            │
//! └────────────────────────────────────────────────────────────┘
//!                 ▲ miss
//! ┌────────────────────────────────────────────────────────────┐
//! │ ResolverChain          named resolvers, priority order     │
//! └────────────────────────────────────────────────────────────┘
//!                 ▲ miss
//! ┌────────────────────────────────────────────────────────────┐
//! │ <current state>.expr, then context.expr                    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Expressions use `${...}` placeholders and are evaluated with minijinja.

mod context;
mod error;
mod expression;
mod resolver;
mod secrets;
mod standard;

pub use context::ExecutionContext;
pub use error::ContextError;
pub use expression::normalize_name;
pub use resolver::{ElementListResolver, ExpressionResolver, ResolverChain};
pub use secrets::SecretResolver;
pub use standard::WorkflowStandardParams;
