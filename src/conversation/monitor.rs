// conversation/monitor.rs - Multi-Conversation Tracking

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, info};

use crate::acl_message::AclMessage;
use crate::conversation::factory::StateMachineFactory;
use crate::conversation::state_machine::{
    ConsumeOutcome, ConversationStateMachine, ProtocolViolation,
};

/// Why the monitor could not route a message.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Message carries no conversation id")]
    MissingConversationId,

    #[error("Message carries no protocol field")]
    MissingProtocol,

    #[error("No specification registered for protocol `{0}`")]
    UnknownProtocol(String),

    #[error(transparent)]
    Violation(#[from] ProtocolViolation),
}

/// Tracks every live conversation seen on a message stream.
///
/// Messages are routed by conversation id. The first message of a
/// conversation instantiates a fresh machine from the factory, selected
/// by the message's protocol field; a conversation that reaches a final
/// state is dropped. A rejected message leaves its conversation alive;
/// the caller decides whether to end it.
pub struct ConversationMonitor {
    factory: Arc<StateMachineFactory>,
    conversations: DashMap<String, ConversationStateMachine>,
}

impl ConversationMonitor {
    pub fn new(factory: Arc<StateMachineFactory>) -> Self {
        Self {
            factory,
            conversations: DashMap::new(),
        }
    }

    /// Route one message to its conversation.
    pub fn consume(&self, msg: &AclMessage) -> Result<ConsumeOutcome, MonitorError> {
        let conversation_id = msg
            .conversation_id
            .clone()
            .ok_or(MonitorError::MissingConversationId)?;

        let mut machine = match self.conversations.entry(conversation_id.clone()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                let protocol = msg
                    .protocol
                    .as_deref()
                    .ok_or(MonitorError::MissingProtocol)?;
                let machine = self
                    .factory
                    .machine_for(protocol)
                    .ok_or_else(|| MonitorError::UnknownProtocol(protocol.to_string()))?;
                info!(conversation_id = %conversation_id, protocol, "conversation opened");
                entry.insert(machine)
            }
        };

        let outcome = machine.consume(msg)?;
        let over = machine.is_over();
        drop(machine);

        if over {
            self.conversations.remove(&conversation_id);
            debug!(conversation_id = %conversation_id, "conversation closed");
        }
        Ok(outcome)
    }

    /// Forget a conversation, e.g. after the caller decided a violation
    /// is terminal.
    pub fn end_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.remove(conversation_id).is_some()
    }

    pub fn active_conversations(&self) -> usize {
        self.conversations.len()
    }
}
