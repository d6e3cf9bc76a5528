// lib.rs - FIPA ACL Conversation Protocol Engine
//
// Declarative interaction-protocol state machines for validating and
// driving multi-party agent conversations.

#![doc = include_str!("../README.md")]

pub mod acl_message;
pub mod conversation;
pub mod observability;

// Re-export commonly used types
pub use acl_message::{AclMessage, AgentId, Performative};

pub use conversation::{
    ConsumeOutcome, ConversationMonitor, ConversationStateMachine, Expectations, MonitorError,
    ProtocolViolation, RoleTable, SpecParseError, SpecificationReader, State, StateMachineFactory,
    Transition, TransitionFailure, TransitionTarget, ValidationFailure,
};

pub use observability::{TracingConfig, TracingFormat, init_tracing};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::acl_message::{AclMessage, AgentId, Performative};
    pub use crate::conversation::{
        ConsumeOutcome, ConversationMonitor, ConversationStateMachine, MonitorError,
        ProtocolViolation, SpecParseError, SpecificationReader, StateMachineFactory,
        ValidationFailure,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
