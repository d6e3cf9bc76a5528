// conversation/transition.rs - Role-Guarded Protocol Transitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

use crate::acl_message::{AclMessage, AgentId, Performative};
use crate::conversation::roles::RoleTable;
use crate::conversation::state_machine::Expectations;
use crate::conversation::StateIndex;

/// Where a transition leads.
///
/// A plain target points at a state in the owning machine's arena. An
/// embedded sub-protocol target points at the entry state of a spliced
/// sub-graph together with the role-translation table declared by the
/// specification (`outer role -> sub-protocol role`). The two cases are
/// kept as a closed variant because resolution and role translation
/// differ between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionTarget {
    State(StateIndex),
    SubProtocol {
        entry: StateIndex,
        mapping: HashMap<String, String>,
    },
}

impl TransitionTarget {
    /// The arena index the machine moves to when the transition fires.
    pub fn entry_state(&self) -> StateIndex {
        match self {
            TransitionTarget::State(index) => *index,
            TransitionTarget::SubProtocol { entry, .. } => *entry,
        }
    }
}

/// Why a single transition refused a message.
///
/// Collected per transition during a state's trial; the full list is the
/// validation-inspection surface exposed through `ProtocolViolation`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("Expected performative `{expected}`, got `{actual}`")]
    Performative {
        expected: Performative,
        actual: Performative,
    },

    #[error("Conversation id `{actual}` does not match bound id `{expected}`")]
    ConversationId { expected: String, actual: String },

    #[error("Sender `{sender}` is not bound to role `{role}`")]
    Sender { role: String, sender: String },

    #[error("Recipient `{recipient}` is not bound to role `{role}`")]
    Recipient { role: String, recipient: String },

    #[error("Language `{actual}` does not match expected `{expected}`")]
    Language { expected: String, actual: String },

    #[error("Encoding `{actual}` does not match expected `{expected}`")]
    Encoding { expected: String, actual: String },

    #[error("Ontology `{actual}` does not match expected `{expected}`")]
    Ontology { expected: String, actual: String },

    #[error("Protocol `{actual}` does not match expected `{expected}`")]
    Protocol { expected: String, actual: String },

    #[error("In-reply-to `{0}` does not match any message archived in the preceding state")]
    InReplyTo(String),
}

/// Bindings a message would establish if its transition wins the trial.
///
/// Validation is side-effect-free: nothing is written to the machine
/// until a transition has been chosen, at which point these effects are
/// applied in one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingEffects {
    /// Conversation id adopted from the first validated message.
    pub bind_conversation_id: Option<String>,
    /// Role bindings adopted from the message's sender/receiver fields.
    pub bind_roles: Vec<(String, Vec<AgentId>)>,
}

/// Read-only view of the machine state a transition validates against.
pub struct ValidationContext<'a> {
    pub roles: &'a RoleTable,
    pub conversation_id: Option<&'a str>,
    pub expectations: &'a Expectations,
    /// Archive of the state the machine was in before the current one;
    /// replies are correlated against it.
    pub preceding_archive: Option<&'a [AclMessage]>,
}

/// A directed, guarded edge of the protocol graph: a role-based
/// sender/receiver expectation, an expected performative, and a resolved
/// target. Owned by its state; all cross-references are arena indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    from: String,
    to: String,
    expected_performative: Performative,
    target: TransitionTarget,
    proxied_to: Option<String>,
}

impl Transition {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        expected_performative: Performative,
        target: TransitionTarget,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            expected_performative,
            target,
            proxied_to: None,
        }
    }

    /// Mark unmatched messages in the owning state for forwarding to
    /// `destination` instead of outright rejection.
    pub fn with_proxied_to(mut self, destination: impl Into<String>) -> Self {
        self.proxied_to = Some(destination.into());
        self
    }

    pub fn from_role(&self) -> &str {
        &self.from
    }

    pub fn to_role(&self) -> &str {
        &self.to
    }

    pub fn expected_performative(&self) -> Performative {
        self.expected_performative
    }

    pub fn target(&self) -> &TransitionTarget {
        &self.target
    }

    pub fn proxied_to(&self) -> Option<&str> {
        self.proxied_to.as_deref()
    }

    /// Validate `msg` against this transition, applying each rule in
    /// order and short-circuiting on the first failure. On success the
    /// returned effects carry every binding the message would establish.
    pub fn validate(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
    ) -> Result<PendingEffects, ValidationFailure> {
        let mut effects = PendingEffects::default();
        self.validate_performative(msg)?;
        self.validate_conversation_id(msg, ctx, &mut effects)?;
        self.validate_sender(msg, ctx, &mut effects)?;
        self.validate_recipients(msg, ctx, &mut effects)?;
        self.validate_language(msg, ctx)?;
        self.validate_encoding(msg, ctx)?;
        self.validate_ontology(msg, ctx)?;
        self.validate_protocol(msg, ctx)?;
        self.validate_in_reply_to(msg, ctx)?;
        self.validate_reply_by(msg)?;
        Ok(effects)
    }

    fn validate_performative(&self, msg: &AclMessage) -> Result<(), ValidationFailure> {
        if msg.performative == self.expected_performative {
            Ok(())
        } else {
            Err(ValidationFailure::Performative {
                expected: self.expected_performative,
                actual: msg.performative,
            })
        }
    }

    fn validate_conversation_id(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
        effects: &mut PendingEffects,
    ) -> Result<(), ValidationFailure> {
        match (ctx.conversation_id, msg.conversation_id.as_deref()) {
            (Some(bound), actual) if actual != Some(bound) => {
                Err(ValidationFailure::ConversationId {
                    expected: bound.to_string(),
                    actual: actual.unwrap_or_default().to_string(),
                })
            }
            (None, Some(id)) => {
                effects.bind_conversation_id = Some(id.to_string());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn validate_sender(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
        effects: &mut PendingEffects,
    ) -> Result<(), ValidationFailure> {
        if !ctx.roles.is_bound(&self.from) {
            trace!(role = %self.from, sender = %msg.sender, "sender role unbound, adopting from message");
            effects
                .bind_roles
                .push((self.from.clone(), vec![msg.sender.clone()]));
            return Ok(());
        }
        if ctx.roles.contains_agent(&self.from, &msg.sender) {
            Ok(())
        } else {
            Err(ValidationFailure::Sender {
                role: self.from.clone(),
                sender: msg.sender.name.clone(),
            })
        }
    }

    fn validate_recipients(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
        effects: &mut PendingEffects,
    ) -> Result<(), ValidationFailure> {
        if !ctx.roles.is_bound(&self.to) {
            if !msg.receivers.is_empty() {
                trace!(role = %self.to, "recipient role unbound, adopting from message");
                effects
                    .bind_roles
                    .push((self.to.clone(), msg.receivers.clone()));
            }
            return Ok(());
        }
        for recipient in &msg.receivers {
            if !ctx.roles.contains_agent(&self.to, recipient) {
                return Err(ValidationFailure::Recipient {
                    role: self.to.clone(),
                    recipient: recipient.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_language(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), ValidationFailure> {
        match &ctx.expectations.language {
            Some(expected) if msg.language.as_deref() != Some(expected) => {
                Err(ValidationFailure::Language {
                    expected: expected.clone(),
                    actual: msg.language.clone().unwrap_or_default(),
                })
            }
            _ => Ok(()),
        }
    }

    fn validate_encoding(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), ValidationFailure> {
        match &ctx.expectations.encoding {
            Some(expected) if msg.encoding.as_deref() != Some(expected) => {
                Err(ValidationFailure::Encoding {
                    expected: expected.clone(),
                    actual: msg.encoding.clone().unwrap_or_default(),
                })
            }
            _ => Ok(()),
        }
    }

    fn validate_ontology(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), ValidationFailure> {
        match &ctx.expectations.ontology {
            Some(expected) if msg.ontology.as_deref() != Some(expected) => {
                Err(ValidationFailure::Ontology {
                    expected: expected.clone(),
                    actual: msg.ontology.clone().unwrap_or_default(),
                })
            }
            _ => Ok(()),
        }
    }

    fn validate_protocol(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), ValidationFailure> {
        match &ctx.expectations.protocol {
            Some(expected) if msg.protocol.as_deref() != Some(expected) => {
                Err(ValidationFailure::Protocol {
                    expected: expected.clone(),
                    actual: msg.protocol.clone().unwrap_or_default(),
                })
            }
            _ => Ok(()),
        }
    }

    fn validate_in_reply_to(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), ValidationFailure> {
        let Some(reference) = msg.in_reply_to.as_deref() else {
            return Ok(());
        };
        let archive = ctx.preceding_archive.unwrap_or(&[]);
        if archive.iter().any(|m| m.correlation_id() == reference) {
            Ok(())
        } else {
            Err(ValidationFailure::InReplyTo(reference.to_string()))
        }
    }

    // Reply-by deadlines are not validated. The rule is part of the FIPA
    // vocabulary but has no enforcement here; deadline policy belongs to
    // the layer driving the conversation.
    fn validate_reply_by(&self, _msg: &AclMessage) -> Result<(), ValidationFailure> {
        Ok(())
    }
}
