// conversation/state.rs - Protocol States, Message Trial and Fan-In Tracking

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::trace;

use crate::acl_message::{AclMessage, AgentId};
use crate::conversation::transition::{
    PendingEffects, Transition, ValidationContext, ValidationFailure,
};

/// One transition's outcome in a failed trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionFailure {
    /// Position of the transition in the state's declaration order.
    pub transition: usize,
    pub failure: ValidationFailure,
}

/// A node of the protocol graph.
///
/// Owns its outgoing transitions in declaration order. The ticked sets
/// and the archive are per-conversation runtime data: they record which
/// participants have produced an accepted message since the state was
/// entered, and keep the accepted messages themselves for reply
/// correlation by transitions leaving this state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    name: String,
    is_final: bool,
    transitions: Vec<Transition>,
    ticked_senders: BTreeSet<String>,
    ticked_recipients: BTreeSet<String>,
    archive: Vec<AclMessage>,
}

impl State {
    pub fn new(name: impl Into<String>, is_final: bool) -> Self {
        Self {
            name: name.into(),
            is_final,
            transitions: Vec::new(),
            ticked_senders: BTreeSet::new(),
            ticked_recipients: BTreeSet::new(),
            archive: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn add_transition(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn archived(&self) -> &[AclMessage] {
        &self.archive
    }

    /// Clear ticking and archive for a fresh entry into this state.
    pub fn reset(&mut self) {
        self.ticked_senders.clear();
        self.ticked_recipients.clear();
        self.archive.clear();
    }

    /// Try each transition in declaration order; the first one that
    /// validates wins. A failed trial mutates nothing and reports every
    /// transition's failure.
    pub fn trial(
        &self,
        msg: &AclMessage,
        ctx: &ValidationContext<'_>,
    ) -> Result<(usize, PendingEffects), Vec<TransitionFailure>> {
        let mut failures = Vec::with_capacity(self.transitions.len());
        for (index, transition) in self.transitions.iter().enumerate() {
            match transition.validate(msg, ctx) {
                Ok(effects) => {
                    trace!(state = %self.name, transition = index, "transition validated");
                    return Ok((index, effects));
                }
                Err(failure) => {
                    trace!(state = %self.name, transition = index, %failure, "transition refused");
                    failures.push(TransitionFailure {
                        transition: index,
                        failure,
                    });
                }
            }
        }
        Err(failures)
    }

    /// Record the identities an accepted message concerns: its sender,
    /// and every recipient it declares.
    pub fn tick(&mut self, msg: &AclMessage) {
        self.ticked_senders.insert(msg.sender.name.clone());
        for recipient in &msg.receivers {
            self.ticked_recipients.insert(recipient.name.clone());
        }
    }

    pub fn archive_message(&mut self, msg: AclMessage) {
        self.archive.push(msg);
    }

    /// The multi-party fan-in gate: the state may only be exited once
    /// every distinct expected identity has been ticked at least once
    /// since the state was entered.
    pub fn all_accounted_for(
        &self,
        expected_senders: &[AgentId],
        expected_recipients: &[AgentId],
    ) -> bool {
        expected_senders
            .iter()
            .all(|agent| self.ticked_senders.contains(&agent.name))
            && expected_recipients
                .iter()
                .all(|agent| self.ticked_recipients.contains(&agent.name))
    }

    /// Destination for unmatched messages, when any transition of this
    /// state declares one.
    pub fn proxy_destination(&self) -> Option<&str> {
        self.transitions.iter().find_map(Transition::proxied_to)
    }
}
