//! Statewright Engine
//!
//! This crate provides the durable state machine executor. Every step of an
//! execution is persisted as a
//! [`StateExecutionInstance`](statewright_store::StateExecutionInstance)
//! and moved through its statuses with conditional updates.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   StateMachineExecutor                      │
//! │  - execute(request) / trigger(instance)                     │
//! │  - start → execute state → handle response → transition     │
//! │  - register_interrupt(interrupt) for operator control       │
//! └─────────────────────────────────────────────────────────────┘
//!        │ async responses, delays                 ▲ deliveries
//!        ▼                                         │
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │         WaitNotify           │──▶│       CallbackPump       │
//! │  - wait_for_all(ids)         │   │  - resumes instances     │
//! │  - done_with(id, response)   │   │    on the worker pool    │
//! └──────────────────────────────┘   └──────────────────────────┘
//!        ▲
//!        │ completions
//! ┌──────────────────────────────┐
//! │  TaskDispatcher, delays,     │
//! │  spawned child instances     │
//! └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use statewright_engine::{CallbackPump, ExecutionRequest, InMemoryWaitNotify, StateMachineExecutor};
//!
//! let (wait_notify, deliveries) = InMemoryWaitNotify::new();
//! let wait_notify = Arc::new(wait_notify);
//! let delay = Arc::new(TokioDelayScheduler::new(wait_notify.clone()));
//! let executor = StateMachineExecutor::builder(store, dispatcher, wait_notify, delay).build();
//!
//! let registry = builtin_registry(dispatcher.clone());
//! executor.register_machine(StateMachine::build(&def, &registry)?).await;
//!
//! let cancel = CancellationToken::new();
//! tokio::spawn(CallbackPump::new(executor.clone(), deliveries).start(cancel));
//! executor.execute(ExecutionRequest::new("deploy")).await?;
//! ```

mod advice;
mod advisor;
mod callback;
mod delay;
mod dispatcher;
mod error;
mod events;
mod executor;
mod failure_strategy;
mod interrupt;
mod pump;
mod resume;
mod states;
mod status;
mod transition;
mod wait_notify;

pub use advisor::{AdvisorRegistry, ExecutionEvent, ExecutionEventAdvice, ExecutionEventAdvisor};
pub use callback::{CallbackRegistry, ChannelCallback, ExecutionCallback, ExecutionOutcome};
pub use delay::{DelayScheduler, TokioDelayScheduler};
pub use dispatcher::{DelegateTask, DispatchError, TaskDispatcher};
pub use error::ExecutorError;
pub use events::{ChannelNotifier, EngineEvent, ExecutionNotifier, NoopNotifier};
pub use executor::{ExecutionRequest, ExecutorBuilder, StateMachineExecutor};
pub use failure_strategy::{FailureStrategy, FailureStrategyAdvisor, RepairAction, SkipConditionAdvisor};
pub use pump::CallbackPump;
pub use states::{
  ApprovalState, BarrierState, CommandState, ForkState, NoopState, SubWorkflowState, approval_correlation_id,
  builtin_registry,
};
pub use wait_notify::{Delivery, InMemoryWaitNotify, Notification, NotifyCallback, NotifyError, WaitNotify};
