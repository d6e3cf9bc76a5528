// conversation/mod.rs - Conversation Protocol Engine

//! Declarative conversation protocol state machines.
//!
//! A protocol is described by a specification document: a graph of
//! states connected by role-guarded transitions. The reader builds an
//! immutable template machine from the document; every live conversation
//! runs on its own deep copy, binding symbolic roles to concrete agent
//! identities as messages arrive and enforcing ordering, role and
//! per-message constraints along the way.
//!
//! - `SpecificationReader` - parses documents into template machines
//! - `ConversationStateMachine` - per-conversation runtime instance
//! - `State` / `Transition` - the graph, with first-match-wins trials
//!   and multi-party fan-in ticking
//! - `StateMachineFactory` - template registry over resource directories
//! - `ConversationMonitor` - routes a message stream to many live
//!   conversations
//!
//! # Example
//!
//! ```ignore
//! use fipa_conversation::conversation::*;
//!
//! let template = SpecificationReader::load_specification("protocols/request.json")?;
//!
//! let mut conversation = template.clone();
//! match conversation.consume(&message) {
//!     Ok(ConsumeOutcome::Completed { state }) => { /* done */ }
//!     Ok(outcome) => { /* still running */ }
//!     Err(violation) => { /* caller decides */ }
//! }
//! ```

mod factory;
mod monitor;
mod reader;
mod roles;
mod state;
mod state_machine;
mod transition;

/// Index of a state in its machine's arena. All back-references in the
/// graph are plain indices, which keeps the graph cycle-free for
/// ownership purposes and makes per-conversation deep copies cheap.
pub type StateIndex = usize;

pub use factory::StateMachineFactory;
pub use monitor::{ConversationMonitor, MonitorError};
pub use reader::{SpecParseError, SpecificationReader};
pub use roles::RoleTable;
pub use state::{State, TransitionFailure};
pub use state_machine::{
    ConsumeOutcome, ConversationStateMachine, Expectations, ProtocolViolation,
};
pub use transition::{
    PendingEffects, Transition, TransitionTarget, ValidationContext, ValidationFailure,
};
