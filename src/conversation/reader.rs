// conversation/reader.rs - Protocol Specification Reader

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::acl_message::{AgentId, Performative};
use crate::conversation::roles::RoleTable;
use crate::conversation::state::State;
use crate::conversation::state_machine::{ConversationStateMachine, Expectations};
use crate::conversation::transition::{Transition, TransitionTarget};
use crate::conversation::StateIndex;

/// Attribute and element names of the specification document schema.
mod attr {
    pub const PROTOCOL: &str = "protocol";
    pub const NAME: &str = "name";
    pub const LANGUAGE: &str = "language";
    pub const ENCODING: &str = "encoding";
    pub const ONTOLOGY: &str = "ontology";
    pub const ROLES: &str = "roles";
    pub const AGENTS: &str = "agents";
    pub const STATES: &str = "states";
    pub const ID: &str = "id";
    pub const INITIAL: &str = "initial";
    pub const FINAL: &str = "final";
    pub const TRANSITIONS: &str = "transitions";
    pub const FROM: &str = "from";
    pub const TO: &str = "to";
    pub const PERFORMATIVE: &str = "performative";
    pub const TARGET: &str = "target";
    pub const SUBPROTOCOL: &str = "subprotocol";
    pub const MAPPING: &str = "mapping";
    pub const PROXIED_TO: &str = "proxiedTo";
}

/// Why a specification document could not be loaded.
///
/// Every variant is fatal to that load; no partially built machine is
/// ever returned.
#[derive(Debug, thiserror::Error)]
pub enum SpecParseError {
    #[error("Failed to read specification `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Specification `{path}` is not a well-formed document")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required attribute `{attribute}` on `{element}` element")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("Malformed `{element}` element")]
    MalformedElement { element: &'static str },

    #[error("Duplicate state identifier `{0}`")]
    DuplicateState(String),

    #[error("No state is marked initial")]
    NoInitialState,

    #[error("More than one state is marked initial")]
    MultipleInitialStates,

    #[error("No state is marked final")]
    NoFinalState,

    #[error("Transition target `{target}` in state `{state}` does not name a declared state")]
    DanglingTarget { state: String, target: String },

    #[error("Unknown performative `{0}`")]
    UnknownPerformative(String),

    #[error("Malformed role mapping on transition in state `{0}`")]
    MalformedMapping(String),

    #[error("Cyclic subprotocol reference involving `{}`", .0.display())]
    CyclicSubProtocol(PathBuf),
}

type JsonMap = serde_json::Map<String, Value>;

/// Parses declarative protocol specification documents into state
/// machine templates.
///
/// Construction is two-pass per document: every state is created and
/// registered by identifier before any transition is resolved, so a
/// transition may reference a state declared later in the document. A
/// transition that names a `subprotocol` instead of a `target` pulls the
/// referenced document into the same arena as a disjoint, namespaced
/// sub-graph and points at its initial state.
pub struct SpecificationReader;

/// Arena and bindings accumulated across a document and its embedded
/// sub-protocols.
struct LoadContext {
    states: Vec<State>,
    roles: RoleTable,
    protocol_name: Option<String>,
    expectations: Expectations,
    /// Canonical paths currently being loaded, for cycle detection.
    stack: Vec<PathBuf>,
    embed_counter: usize,
}

impl LoadContext {
    fn new() -> Self {
        Self {
            states: Vec::new(),
            roles: RoleTable::new(),
            protocol_name: None,
            expectations: Expectations::default(),
            stack: Vec::new(),
            embed_counter: 0,
        }
    }

    /// A fresh namespace for an embedded document, derived from the
    /// reference so spliced state names stay readable.
    fn next_namespace(&mut self, reference: &str) -> String {
        let stem = Path::new(reference)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("subprotocol");
        self.embed_counter += 1;
        format!("{}.{}", stem, self.embed_counter)
    }
}

impl SpecificationReader {
    /// Load the specification document at `path` and build the protocol
    /// state machine template for it.
    pub fn load_specification(
        path: impl AsRef<Path>,
    ) -> Result<ConversationStateMachine, SpecParseError> {
        let path = path.as_ref();
        let mut ctx = LoadContext::new();
        let initial = Self::load_document(path, None, &mut ctx)?;

        let protocol = ctx.protocol_name.unwrap_or_default();
        info!(
            protocol = %protocol,
            states = ctx.states.len(),
            path = %path.display(),
            "Specification loaded"
        );
        Ok(ConversationStateMachine::new(
            protocol,
            ctx.states,
            initial,
            ctx.roles,
            ctx.expectations,
        ))
    }

    /// Parse one document into the shared arena and return the index of
    /// its initial state. `namespace` is None for the top-level document
    /// and a unique prefix for embedded ones.
    fn load_document(
        path: &Path,
        namespace: Option<&str>,
        ctx: &mut LoadContext,
    ) -> Result<StateIndex, SpecParseError> {
        let canonical = path.canonicalize().map_err(|source| SpecParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if ctx.stack.contains(&canonical) {
            return Err(SpecParseError::CyclicSubProtocol(canonical));
        }
        ctx.stack.push(canonical.clone());

        let text = fs::read_to_string(&canonical).map_err(|source| SpecParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value =
            serde_json::from_str(&text).map_err(|source| SpecParseError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        let protocol = document
            .get(attr::PROTOCOL)
            .and_then(Value::as_object)
            .ok_or(SpecParseError::MissingAttribute {
                element: "document",
                attribute: attr::PROTOCOL,
            })?;
        let name = require_str(protocol, attr::PROTOCOL, attr::NAME)?;

        // Machine-level expectations come from the top-level document
        // only; an embedded protocol contributes states, not policy.
        if namespace.is_none() {
            ctx.protocol_name = Some(name.to_string());
            ctx.expectations = Expectations {
                language: optional_str(protocol, attr::LANGUAGE),
                encoding: optional_str(protocol, attr::ENCODING),
                ontology: optional_str(protocol, attr::ONTOLOGY),
                protocol: optional_str(protocol, attr::PROTOCOL),
            };
        }

        Self::parse_roles(protocol, namespace, ctx)?;

        let state_values = protocol
            .get(attr::STATES)
            .and_then(Value::as_array)
            .ok_or(SpecParseError::MissingAttribute {
                element: attr::PROTOCOL,
                attribute: attr::STATES,
            })?;

        // First pass: create every state and index it by identifier, so
        // transitions may forward-reference later states.
        let base = ctx.states.len();
        let mut elements: Vec<&JsonMap> = Vec::with_capacity(state_values.len());
        let mut lookup: HashMap<String, StateIndex> = HashMap::new();
        let mut initial: Option<StateIndex> = None;
        let mut has_final = false;
        for value in state_values {
            let element = value
                .as_object()
                .ok_or(SpecParseError::MalformedElement { element: "state" })?;
            let id = qualify(namespace, require_str(element, "state", attr::ID)?);
            let index = ctx.states.len();
            if lookup.insert(id.clone(), index).is_some() {
                return Err(SpecParseError::DuplicateState(id));
            }
            if flag(element, attr::INITIAL) {
                if initial.replace(index).is_some() {
                    return Err(SpecParseError::MultipleInitialStates);
                }
            }
            let is_final = flag(element, attr::FINAL);
            has_final |= is_final;
            ctx.states.push(State::new(id, is_final));
            elements.push(element);
        }
        let initial = initial.ok_or(SpecParseError::NoInitialState)?;
        if !has_final {
            return Err(SpecParseError::NoFinalState);
        }

        // Second pass: resolve transitions against the lookup table.
        for (offset, element) in elements.iter().enumerate() {
            let Some(transitions) = element.get(attr::TRANSITIONS) else {
                continue;
            };
            let transitions = transitions
                .as_array()
                .ok_or(SpecParseError::MalformedElement {
                    element: attr::TRANSITIONS,
                })?;
            for value in transitions {
                let transition = Self::parse_transition(
                    value,
                    namespace,
                    &canonical,
                    &lookup,
                    ctx.states[base + offset].name().to_string(),
                    ctx,
                )?;
                ctx.states[base + offset].add_transition(transition);
            }
        }

        ctx.stack.pop();
        Ok(initial)
    }

    fn parse_transition(
        value: &Value,
        namespace: Option<&str>,
        document: &Path,
        lookup: &HashMap<String, StateIndex>,
        owner: String,
        ctx: &mut LoadContext,
    ) -> Result<Transition, SpecParseError> {
        let element = value.as_object().ok_or(SpecParseError::MalformedElement {
            element: "transition",
        })?;
        let from = qualify(namespace, require_str(element, "transition", attr::FROM)?);
        let to = qualify(namespace, require_str(element, "transition", attr::TO)?);
        let performative_name = require_str(element, "transition", attr::PERFORMATIVE)?;
        let performative: Performative = performative_name
            .parse()
            .map_err(|_| SpecParseError::UnknownPerformative(performative_name.to_string()))?;

        ctx.roles.register(&from);
        ctx.roles.register(&to);

        let target = if let Some(reference) = element.get(attr::SUBPROTOCOL) {
            let reference =
                reference
                    .as_str()
                    .ok_or(SpecParseError::MissingAttribute {
                        element: "transition",
                        attribute: attr::SUBPROTOCOL,
                    })?;
            // Embedded documents are resolved relative to the one that
            // references them.
            let sub_path = document
                .parent()
                .map(|parent| parent.join(reference))
                .unwrap_or_else(|| PathBuf::from(reference));
            let sub_namespace = ctx.next_namespace(reference);
            debug!(subprotocol = reference, namespace = %sub_namespace, "splicing embedded protocol");
            let entry = Self::load_document(&sub_path, Some(&sub_namespace), ctx)?;
            let mapping = parse_mapping(element, namespace, &sub_namespace, &owner)?;
            TransitionTarget::SubProtocol { entry, mapping }
        } else {
            let target_name =
                qualify(namespace, require_str(element, "transition", attr::TARGET)?);
            let index =
                lookup
                    .get(&target_name)
                    .copied()
                    .ok_or_else(|| SpecParseError::DanglingTarget {
                        state: owner.clone(),
                        target: target_name.clone(),
                    })?;
            TransitionTarget::State(index)
        };

        let mut transition = Transition::new(from, to, performative, target);
        if let Some(destination) = element.get(attr::PROXIED_TO) {
            let destination =
                destination
                    .as_str()
                    .ok_or(SpecParseError::MissingAttribute {
                        element: "transition",
                        attribute: attr::PROXIED_TO,
                    })?;
            transition = transition.with_proxied_to(destination);
        }
        Ok(transition)
    }

    /// Optional `roles` element: pre-declares role names, optionally
    /// with static identity bindings.
    fn parse_roles(
        protocol: &JsonMap,
        namespace: Option<&str>,
        ctx: &mut LoadContext,
    ) -> Result<(), SpecParseError> {
        let Some(value) = protocol.get(attr::ROLES) else {
            return Ok(());
        };
        let entries = value
            .as_array()
            .ok_or(SpecParseError::MalformedElement { element: attr::ROLES })?;
        for entry in entries {
            let entry = entry
                .as_object()
                .ok_or(SpecParseError::MalformedElement { element: "role" })?;
            let role = qualify(namespace, require_str(entry, "role", attr::NAME)?);
            ctx.roles.register(&role);
            if let Some(agents) = entry.get(attr::AGENTS) {
                let agents = agents
                    .as_array()
                    .ok_or(SpecParseError::MalformedElement {
                        element: attr::AGENTS,
                    })?
                    .iter()
                    .map(|agent| agent.as_str().map(AgentId::new))
                    .collect::<Option<Vec<_>>>()
                    .ok_or(SpecParseError::MalformedElement {
                        element: attr::AGENTS,
                    })?;
                ctx.roles.bind(&role, agents);
            }
        }
        Ok(())
    }
}

fn require_str<'a>(
    element: &'a JsonMap,
    element_name: &'static str,
    attribute: &'static str,
) -> Result<&'a str, SpecParseError> {
    element
        .get(attribute)
        .and_then(Value::as_str)
        .ok_or(SpecParseError::MissingAttribute {
            element: element_name,
            attribute,
        })
}

fn optional_str(element: &JsonMap, attribute: &str) -> Option<String> {
    element
        .get(attribute)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn flag(element: &JsonMap, attribute: &str) -> bool {
    element
        .get(attribute)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Qualify an identifier with the namespace of its document, keeping
/// spliced sub-graphs disjoint from the enclosing protocol.
fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}.{}", ns, name),
        None => name.to_string(),
    }
}

/// The `mapping` attribute: outer role names to sub-protocol role
/// names, each side qualified with its own document's namespace.
fn parse_mapping(
    element: &JsonMap,
    outer_namespace: Option<&str>,
    inner_namespace: &str,
    owner: &str,
) -> Result<HashMap<String, String>, SpecParseError> {
    let Some(value) = element.get(attr::MAPPING) else {
        return Ok(HashMap::new());
    };
    let object = value
        .as_object()
        .ok_or_else(|| SpecParseError::MalformedMapping(owner.to_string()))?;
    let mut mapping = HashMap::new();
    for (outer, inner) in object {
        let inner = inner
            .as_str()
            .ok_or_else(|| SpecParseError::MalformedMapping(owner.to_string()))?;
        mapping.insert(
            qualify(outer_namespace, outer),
            qualify(Some(inner_namespace), inner),
        );
    }
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl_message::AclMessage;
    use crate::conversation::state_machine::ConsumeOutcome;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    const TWO_STATE_SPEC: &str = r#"{
        "protocol": {
            "name": "test-request",
            "states": [
                { "id": "start", "initial": true, "transitions": [
                    { "from": "initiator", "to": "participant",
                      "performative": "request", "target": "done" }
                ]},
                { "id": "done", "final": true }
            ]
        }
    }"#;

    fn write_spec(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_two_state_protocol() {
        let dir = TempDir::new().unwrap();
        let path = write_spec(&dir, "request.json", TWO_STATE_SPEC);

        let machine = SpecificationReader::load_specification(&path).unwrap();
        assert_eq!(machine.protocol(), "test-request");
        assert_eq!(machine.states().len(), 2);
        assert_eq!(machine.current_state().name(), "start");
        assert!(!machine.is_over());
        // Roles referenced by transitions are registered, unbound.
        assert!(machine.role_bindings().roles().any(|r| r == "initiator"));
        assert!(!machine.role_bindings().is_bound("initiator"));
    }

    #[test]
    fn test_machine_expectations_from_attributes() {
        let dir = TempDir::new().unwrap();
        let spec = json!({
            "protocol": {
                "name": "test-request",
                "protocol": "test-request",
                "language": "fipa-sl0",
                "ontology": "logistics",
                "states": [
                    { "id": "start", "initial": true, "transitions": [
                        { "from": "a", "to": "b", "performative": "request", "target": "done" }
                    ]},
                    { "id": "done", "final": true }
                ]
            }
        });
        let path = write_spec(&dir, "spec.json", &spec.to_string());

        let machine = SpecificationReader::load_specification(&path).unwrap();
        assert_eq!(machine.expectations().language.as_deref(), Some("fipa-sl0"));
        assert_eq!(machine.expectations().ontology.as_deref(), Some("logistics"));
        assert_eq!(
            machine.expectations().protocol.as_deref(),
            Some("test-request")
        );
        assert_eq!(machine.expectations().encoding, None);
    }

    #[test]
    fn test_statically_bound_roles() {
        let dir = TempDir::new().unwrap();
        let spec = json!({
            "protocol": {
                "name": "test-request",
                "roles": [
                    { "name": "initiator", "agents": ["dispatcher"] },
                    { "name": "participant" }
                ],
                "states": [
                    { "id": "start", "initial": true, "transitions": [
                        { "from": "initiator", "to": "participant",
                          "performative": "request", "target": "done" }
                    ]},
                    { "id": "done", "final": true }
                ]
            }
        });
        let path = write_spec(&dir, "spec.json", &spec.to_string());

        let mut machine = SpecificationReader::load_specification(&path).unwrap();
        assert!(machine
            .role_bindings()
            .contains_agent("initiator", &AgentId::new("dispatcher")));

        // A statically bound role refuses other senders.
        let intruder = AclMessage::new(
            Performative::Request,
            AgentId::new("stranger"),
            vec![AgentId::new("worker")],
        )
        .with_conversation("c1");
        assert!(machine.consume(&intruder).is_err());
    }

    #[test]
    fn test_dangling_target_is_fatal() {
        let dir = TempDir::new().unwrap();
        let spec = r#"{
            "protocol": {
                "name": "broken",
                "states": [
                    { "id": "start", "initial": true, "transitions": [
                        { "from": "a", "to": "b", "performative": "request", "target": "nowhere" }
                    ]},
                    { "id": "done", "final": true }
                ]
            }
        }"#;
        let path = write_spec(&dir, "broken.json", spec);

        let err = SpecificationReader::load_specification(&path).unwrap_err();
        assert!(matches!(
            err,
            SpecParseError::DanglingTarget { ref state, ref target }
                if state == "start" && target == "nowhere"
        ));
    }

    #[test]
    fn test_duplicate_state_identifier_is_fatal() {
        let dir = TempDir::new().unwrap();
        let spec = r#"{
            "protocol": {
                "name": "broken",
                "states": [
                    { "id": "start", "initial": true },
                    { "id": "start", "final": true }
                ]
            }
        }"#;
        let path = write_spec(&dir, "broken.json", spec);

        let err = SpecificationReader::load_specification(&path).unwrap_err();
        assert!(matches!(err, SpecParseError::DuplicateState(ref id) if id == "start"));
    }

    #[test]
    fn test_missing_state_identifier_is_fatal() {
        let dir = TempDir::new().unwrap();
        let spec = r#"{
            "protocol": {
                "name": "broken",
                "states": [ { "initial": true, "final": true } ]
            }
        }"#;
        let path = write_spec(&dir, "broken.json", spec);

        let err = SpecificationReader::load_specification(&path).unwrap_err();
        assert!(matches!(
            err,
            SpecParseError::MissingAttribute { element: "state", attribute: "id" }
        ));
    }

    #[test]
    fn test_initial_state_invariants() {
        let dir = TempDir::new().unwrap();

        let none = r#"{ "protocol": { "name": "p", "states": [ { "id": "s", "final": true } ] } }"#;
        let path = write_spec(&dir, "none.json", none);
        assert!(matches!(
            SpecificationReader::load_specification(&path).unwrap_err(),
            SpecParseError::NoInitialState
        ));

        let two = r#"{ "protocol": { "name": "p", "states": [
            { "id": "a", "initial": true },
            { "id": "b", "initial": true, "final": true }
        ] } }"#;
        let path = write_spec(&dir, "two.json", two);
        assert!(matches!(
            SpecificationReader::load_specification(&path).unwrap_err(),
            SpecParseError::MultipleInitialStates
        ));

        let unfinishable =
            r#"{ "protocol": { "name": "p", "states": [ { "id": "a", "initial": true } ] } }"#;
        let path = write_spec(&dir, "unfinishable.json", unfinishable);
        assert!(matches!(
            SpecificationReader::load_specification(&path).unwrap_err(),
            SpecParseError::NoFinalState
        ));
    }

    #[test]
    fn test_unknown_performative_is_fatal() {
        let dir = TempDir::new().unwrap();
        let spec = r#"{
            "protocol": {
                "name": "broken",
                "states": [
                    { "id": "start", "initial": true, "transitions": [
                        { "from": "a", "to": "b", "performative": "grumble", "target": "done" }
                    ]},
                    { "id": "done", "final": true }
                ]
            }
        }"#;
        let path = write_spec(&dir, "broken.json", spec);

        let err = SpecificationReader::load_specification(&path).unwrap_err();
        assert!(matches!(err, SpecParseError::UnknownPerformative(ref p) if p == "grumble"));
    }

    #[test]
    fn test_subprotocol_embedding_and_role_mapping() {
        let dir = TempDir::new().unwrap();
        write_spec(&dir, "inner.json", TWO_STATE_SPEC);
        let outer = json!({
            "protocol": {
                "name": "test-brokering",
                "states": [
                    { "id": "start", "initial": true, "transitions": [
                        { "from": "client", "to": "broker",
                          "performative": "proxy",
                          "subprotocol": "inner.json",
                          "mapping": { "broker": "initiator" },
                          "proxiedTo": "client" }
                    ]},
                    { "id": "refused", "final": true }
                ]
            }
        });
        let path = write_spec(&dir, "outer.json", &outer.to_string());

        let mut machine = SpecificationReader::load_specification(&path).unwrap();
        // 2 outer states + 2 spliced inner states, namespaced.
        assert_eq!(machine.states().len(), 4);
        assert!(machine.state_index("inner.1.start").is_some());
        assert!(machine.state_index("inner.1.done").is_some());

        // Drive into the sub-protocol: the broker identity is carried
        // over into the embedded initiator role.
        let open = AclMessage::new(
            Performative::Proxy,
            AgentId::new("alice"),
            vec![AgentId::new("middleman")],
        )
        .with_conversation("c1");
        assert_eq!(
            machine.consume(&open).unwrap(),
            ConsumeOutcome::Advanced {
                state: "inner.1.start".into()
            }
        );
        assert!(machine
            .role_bindings()
            .contains_agent("inner.1.initiator", &AgentId::new("middleman")));

        let request = AclMessage::new(
            Performative::Request,
            AgentId::new("middleman"),
            vec![AgentId::new("worker")],
        )
        .with_conversation("c1");
        assert_eq!(
            machine.consume(&request).unwrap(),
            ConsumeOutcome::Completed {
                state: "inner.1.done".into()
            }
        );
    }

    #[test]
    fn test_cyclic_subprotocol_reference_is_fatal() {
        let dir = TempDir::new().unwrap();
        let a = json!({
            "protocol": {
                "name": "a",
                "states": [
                    { "id": "start", "initial": true, "transitions": [
                        { "from": "x", "to": "y", "performative": "request", "subprotocol": "b.json" }
                    ]},
                    { "id": "done", "final": true }
                ]
            }
        });
        let b = json!({
            "protocol": {
                "name": "b",
                "states": [
                    { "id": "start", "initial": true, "transitions": [
                        { "from": "x", "to": "y", "performative": "request", "subprotocol": "a.json" }
                    ]},
                    { "id": "done", "final": true }
                ]
            }
        });
        write_spec(&dir, "b.json", &b.to_string());
        let path = write_spec(&dir, "a.json", &a.to_string());

        let err = SpecificationReader::load_specification(&path).unwrap_err();
        assert!(matches!(err, SpecParseError::CyclicSubProtocol(_)));
    }

    proptest! {
        /// Any linear chain of states with one initial and one final
        /// state loads, and the machine starts at the head of the chain.
        #[test]
        fn prop_linear_protocols_load(len in 1usize..8) {
            let states: Vec<_> = (0..=len)
                .map(|i| {
                    if i == len {
                        json!({ "id": format!("s{}", i), "final": true })
                    } else {
                        json!({
                            "id": format!("s{}", i),
                            "initial": i == 0,
                            "transitions": [{
                                "from": "initiator",
                                "to": "participant",
                                "performative": "inform",
                                "target": format!("s{}", i + 1)
                            }]
                        })
                    }
                })
                .collect();
            let spec = json!({ "protocol": { "name": "chain", "states": states } });

            let dir = TempDir::new().unwrap();
            let path = write_spec(&dir, "chain.json", &spec.to_string());
            let machine = SpecificationReader::load_specification(&path).unwrap();

            prop_assert_eq!(machine.states().len(), len + 1);
            prop_assert_eq!(machine.current_state().name(), "s0");
            prop_assert_eq!(
                machine.states().iter().filter(|s| s.is_final()).count(),
                1
            );
        }
    }
}
