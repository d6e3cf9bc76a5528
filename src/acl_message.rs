// acl_message.rs - FIPA ACL message and agent identity types

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Agent identifier with addressing information.
///
/// Role resolution and fan-in ticking compare identities by name; the
/// transport addresses are carried along for the routing layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{name}")]
pub struct AgentId {
    pub name: String,
    pub addresses: Vec<String>,
    pub resolvers: Vec<String>,
}

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
            resolvers: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }
}

/// FIPA performative types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Performative {
    AcceptProposal,
    Agree,
    Cancel,
    Cfp,
    Confirm,
    Disconfirm,
    Failure,
    Inform,
    InformDone,
    InformIf,
    InformRef,
    InformResult,
    NotUnderstood,
    Propagate,
    Propose,
    Proxy,
    QueryIf,
    QueryRef,
    Refuse,
    RejectProposal,
    Request,
    RequestWhen,
    RequestWhenever,
    Subscribe,
}

impl Performative {
    /// The kebab-case name used in protocol specification documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Performative::AcceptProposal => "accept-proposal",
            Performative::Agree => "agree",
            Performative::Cancel => "cancel",
            Performative::Cfp => "cfp",
            Performative::Confirm => "confirm",
            Performative::Disconfirm => "disconfirm",
            Performative::Failure => "failure",
            Performative::Inform => "inform",
            Performative::InformDone => "inform-done",
            Performative::InformIf => "inform-if",
            Performative::InformRef => "inform-ref",
            Performative::InformResult => "inform-result",
            Performative::NotUnderstood => "not-understood",
            Performative::Propagate => "propagate",
            Performative::Propose => "propose",
            Performative::Proxy => "proxy",
            Performative::QueryIf => "query-if",
            Performative::QueryRef => "query-ref",
            Performative::Refuse => "refuse",
            Performative::RejectProposal => "reject-proposal",
            Performative::Request => "request",
            Performative::RequestWhen => "request-when",
            Performative::RequestWhenever => "request-whenever",
            Performative::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Performative {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "accept-proposal" => Ok(Performative::AcceptProposal),
            "agree" => Ok(Performative::Agree),
            "cancel" => Ok(Performative::Cancel),
            "cfp" => Ok(Performative::Cfp),
            "confirm" => Ok(Performative::Confirm),
            "disconfirm" => Ok(Performative::Disconfirm),
            "failure" => Ok(Performative::Failure),
            "inform" => Ok(Performative::Inform),
            "inform-done" => Ok(Performative::InformDone),
            "inform-if" => Ok(Performative::InformIf),
            "inform-ref" => Ok(Performative::InformRef),
            "inform-result" => Ok(Performative::InformResult),
            "not-understood" => Ok(Performative::NotUnderstood),
            "propagate" => Ok(Performative::Propagate),
            "propose" => Ok(Performative::Propose),
            "proxy" => Ok(Performative::Proxy),
            "query-if" => Ok(Performative::QueryIf),
            "query-ref" => Ok(Performative::QueryRef),
            "refuse" => Ok(Performative::Refuse),
            "reject-proposal" => Ok(Performative::RejectProposal),
            "request" => Ok(Performative::Request),
            "request-when" => Ok(Performative::RequestWhen),
            "request-whenever" => Ok(Performative::RequestWhenever),
            "subscribe" => Ok(Performative::Subscribe),
            _ => Err(format!("Unknown performative: {}", value)),
        }
    }
}

/// Complete ACL message.
///
/// Produced and parsed by the wire codec; the conversation engine only
/// reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclMessage {
    pub message_id: String,
    pub performative: Performative,
    pub sender: AgentId,
    pub receivers: Vec<AgentId>,
    pub reply_with: Option<String>,
    pub in_reply_to: Option<String>,
    pub reply_by: Option<DateTime<Utc>>,
    pub conversation_id: Option<String>,
    pub protocol: Option<String>,
    pub language: Option<String>,
    pub encoding: Option<String>,
    pub ontology: Option<String>,
    pub content: Option<String>,
}

impl AclMessage {
    pub fn new(performative: Performative, sender: AgentId, receivers: Vec<AgentId>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            performative,
            sender,
            receivers,
            reply_with: None,
            in_reply_to: None,
            reply_by: None,
            conversation_id: None,
            protocol: None,
            language: None,
            encoding: None,
            ontology: None,
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontology = Some(ontology.into());
        self
    }

    pub fn with_reply_with(mut self, reply_with: impl Into<String>) -> Self {
        self.reply_with = Some(reply_with.into());
        self
    }

    pub fn with_in_reply_to(mut self, in_reply_to: impl Into<String>) -> Self {
        self.in_reply_to = Some(in_reply_to.into());
        self
    }

    pub fn with_reply_by(mut self, reply_by: DateTime<Utc>) -> Self {
        self.reply_by = Some(reply_by);
        self
    }

    /// The identifier a reply must cite via `in_reply_to`: the explicit
    /// `reply_with` tag when present, the message id otherwise.
    pub fn correlation_id(&self) -> &str {
        self.reply_with.as_deref().unwrap_or(&self.message_id)
    }
}
