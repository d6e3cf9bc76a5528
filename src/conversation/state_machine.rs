// conversation/state_machine.rs - Per-Conversation Protocol State Machine

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::acl_message::AclMessage;
use crate::conversation::roles::RoleTable;
use crate::conversation::state::{State, TransitionFailure};
use crate::conversation::transition::{PendingEffects, TransitionTarget, ValidationContext};
use crate::conversation::StateIndex;

/// Machine-level expected message fields.
///
/// Any field left unset is simply not checked; a set field must match
/// the corresponding message field exactly on every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectations {
    pub language: Option<String>,
    pub encoding: Option<String>,
    pub ontology: Option<String>,
    pub protocol: Option<String>,
}

/// What happened to an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Accepted; the active state still expects messages from further
    /// participants before it can be exited.
    Continue,
    /// Accepted; the conversation advanced to the named state.
    Advanced { state: String },
    /// Accepted; the conversation reached a final state and is over.
    Completed { state: String },
    /// No transition matched, but the active state forwards unmatched
    /// messages to another location instead of rejecting them.
    Proxied { destination: String },
}

/// No transition out of the active state accepted the message.
///
/// Carries every transition's individual refusal so callers can inspect
/// why each candidate failed. Rejection is purely observational: the
/// machine did not mutate, and re-feeding the same message yields the
/// same result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No transition out of state `{state}` accepts the message ({} candidate(s) refused)", .failures.len())]
pub struct ProtocolViolation {
    pub state: String,
    pub failures: Vec<TransitionFailure>,
}

/// A conversation protocol state machine.
///
/// The specification reader produces one of these per protocol document;
/// that value is the immutable template. Each live conversation operates
/// on its own clone, so independent conversations never share role
/// bindings, ticking, or progress. All states live in one arena and
/// reference each other by index, which keeps the graph free of
/// ownership cycles and makes the per-conversation deep copy a plain
/// `Clone`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStateMachine {
    protocol: String,
    states: Vec<State>,
    initial: StateIndex,
    current: StateIndex,
    preceding: Option<StateIndex>,
    conversation_id: Option<String>,
    roles: RoleTable,
    expectations: Expectations,
}

impl ConversationStateMachine {
    pub fn new(
        protocol: impl Into<String>,
        states: Vec<State>,
        initial: StateIndex,
        roles: RoleTable,
        expectations: Expectations,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            states,
            initial,
            current: initial,
            preceding: None,
            conversation_id: None,
            roles,
            expectations,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn current_state(&self) -> &State {
        &self.states[self.current]
    }

    /// Index of the named state in the arena.
    pub fn state_index(&self, name: &str) -> Option<StateIndex> {
        self.states.iter().position(|s| s.name() == name)
    }

    /// The conversation id bound from the first validated message; None
    /// until then.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn role_bindings(&self) -> &RoleTable {
        &self.roles
    }

    pub fn expectations(&self) -> &Expectations {
        &self.expectations
    }

    /// Whether the conversation has reached a final state.
    pub fn is_over(&self) -> bool {
        self.states[self.current].is_final()
    }

    /// Feed one message to the conversation.
    ///
    /// The active state's transitions are tried in declaration order;
    /// the first one that validates is applied. An accepted message
    /// binds any still-unbound roles from its sender/receiver fields,
    /// is archived, and ticks the participants it concerns; the machine
    /// advances once every expected participant has been accounted for.
    /// A rejected message leaves the machine untouched.
    pub fn consume(&mut self, msg: &AclMessage) -> Result<ConsumeOutcome, ProtocolViolation> {
        let decision = {
            let ctx = ValidationContext {
                roles: &self.roles,
                conversation_id: self.conversation_id.as_deref(),
                expectations: &self.expectations,
                preceding_archive: self.preceding.map(|index| self.states[index].archived()),
            };
            self.states[self.current].trial(msg, &ctx)
        };

        match decision {
            Ok((index, effects)) => Ok(self.apply(index, effects, msg)),
            Err(failures) => {
                if let Some(destination) = self.states[self.current].proxy_destination() {
                    debug!(
                        protocol = %self.protocol,
                        state = %self.states[self.current].name(),
                        destination,
                        "unmatched message proxied"
                    );
                    return Ok(ConsumeOutcome::Proxied {
                        destination: destination.to_string(),
                    });
                }
                let violation = ProtocolViolation {
                    state: self.states[self.current].name().to_string(),
                    failures,
                };
                warn!(protocol = %self.protocol, %violation, "protocol violation");
                Err(violation)
            }
        }
    }

    fn apply(
        &mut self,
        transition_index: usize,
        effects: PendingEffects,
        msg: &AclMessage,
    ) -> ConsumeOutcome {
        if let Some(id) = effects.bind_conversation_id {
            debug!(protocol = %self.protocol, conversation_id = %id, "conversation id bound");
            self.conversation_id = Some(id);
        }
        for (role, agents) in effects.bind_roles {
            self.roles.bind(&role, agents);
        }

        {
            let state = &mut self.states[self.current];
            state.tick(msg);
            state.archive_message(msg.clone());
        }

        let (complete, target) = {
            let state = &self.states[self.current];
            let transition = &state.transitions()[transition_index];
            let expected_senders = self.roles.agents_for(transition.from_role());
            let expected_recipients = self.roles.agents_for(transition.to_role());
            (
                state.all_accounted_for(expected_senders, expected_recipients),
                transition.target().clone(),
            )
        };

        if !complete {
            debug!(
                protocol = %self.protocol,
                state = %self.states[self.current].name(),
                "message accepted, awaiting further participants"
            );
            return ConsumeOutcome::Continue;
        }
        self.advance(target)
    }

    /// Exit the current state through `target`: translate roles for an
    /// embedded sub-protocol, give the target a fresh entry, and move
    /// the current pointer.
    fn advance(&mut self, target: TransitionTarget) -> ConsumeOutcome {
        if let TransitionTarget::SubProtocol { mapping, .. } = &target {
            for (outer, inner) in mapping {
                let agents = self.roles.agents_for(outer).to_vec();
                if !agents.is_empty() {
                    self.roles.bind(inner, agents);
                }
            }
        }

        let next = target.entry_state();
        self.states[next].reset();
        self.preceding = Some(self.current);
        self.current = next;

        let state = &self.states[self.current];
        if state.is_final() {
            debug!(protocol = %self.protocol, state = %state.name(), "conversation completed");
            ConsumeOutcome::Completed {
                state: state.name().to_string(),
            }
        } else {
            debug!(protocol = %self.protocol, state = %state.name(), "conversation advanced");
            ConsumeOutcome::Advanced {
                state: state.name().to_string(),
            }
        }
    }
}
