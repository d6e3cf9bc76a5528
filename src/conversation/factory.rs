// conversation/factory.rs - State Machine Template Registry

use dashmap::DashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::conversation::reader::{SpecParseError, SpecificationReader};
use crate::conversation::state_machine::ConversationStateMachine;

/// Prepares protocol state machine templates from specification
/// documents and vends per-conversation instances.
///
/// Templates are loaded once and never mutated; `machine_for` hands out
/// a deep copy for every conversation, so a single factory can serve
/// any number of concurrent conversations.
#[derive(Debug, Default)]
pub struct StateMachineFactory {
    resource_dirs: Vec<PathBuf>,
    templates: DashMap<String, ConversationStateMachine>,
}

impl StateMachineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory of `.json` specification documents to scan on
    /// `prepare`.
    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dirs.push(dir.into());
        self
    }

    pub fn add_resource_dir(&mut self, dir: impl Into<PathBuf>) {
        self.resource_dirs.push(dir.into());
    }

    /// Load every specification document found in the resource
    /// directories, keyed by its protocol name. Returns the number of
    /// templates registered; the first unloadable document aborts the
    /// scan.
    pub fn prepare(&self) -> Result<usize, SpecParseError> {
        let mut prepared = 0;
        for dir in &self.resource_dirs {
            let entries = fs::read_dir(dir).map_err(|source| SpecParseError::Io {
                path: dir.clone(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| SpecParseError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let machine = SpecificationReader::load_specification(&path)?;
                debug!(protocol = machine.protocol(), path = %path.display(), "template prepared");
                self.register(machine);
                prepared += 1;
            }
        }
        info!(prepared, "protocol templates prepared");
        Ok(prepared)
    }

    /// Register a template under its protocol name, replacing any
    /// previous one.
    pub fn register(&self, machine: ConversationStateMachine) {
        let protocol = machine.protocol().to_string();
        if self.templates.insert(protocol.clone(), machine).is_some() {
            warn!(protocol, "protocol template replaced");
        }
    }

    /// A fresh runtime instance of the named protocol: an independent
    /// deep copy of the template with its own bindings and progress.
    pub fn machine_for(&self, protocol: &str) -> Option<ConversationStateMachine> {
        self.templates.get(protocol).map(|entry| entry.clone())
    }

    pub fn known_protocols(&self) -> Vec<String> {
        self.templates.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl_message::{AclMessage, AgentId, Performative};
    use std::fs;
    use tempfile::TempDir;

    fn spec(name: &str) -> String {
        format!(
            r#"{{ "protocol": {{ "name": "{}", "states": [
                {{ "id": "start", "initial": true, "transitions": [
                    {{ "from": "initiator", "to": "participant",
                       "performative": "request", "target": "done" }} ] }},
                {{ "id": "done", "final": true }}
            ] }} }}"#,
            name
        )
    }

    #[test]
    fn test_prepare_scans_resource_dirs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.json"), spec("proto-one")).unwrap();
        fs::write(dir.path().join("two.json"), spec("proto-two")).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let factory = StateMachineFactory::new().with_resource_dir(dir.path());
        assert_eq!(factory.prepare().unwrap(), 2);

        let mut known = factory.known_protocols();
        known.sort();
        assert_eq!(known, vec!["proto-one", "proto-two"]);
        assert!(factory.machine_for("proto-one").is_some());
        assert!(factory.machine_for("missing").is_none());
    }

    #[test]
    fn test_vended_instances_leave_template_untouched() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("p.json"), spec("proto")).unwrap();
        let factory = StateMachineFactory::new().with_resource_dir(dir.path());
        factory.prepare().unwrap();

        let mut instance = factory.machine_for("proto").unwrap();
        let msg = AclMessage::new(
            Performative::Request,
            AgentId::new("a"),
            vec![AgentId::new("b")],
        )
        .with_conversation("c1");
        instance.consume(&msg).unwrap();
        assert!(instance.is_over());

        // The next instance starts from the pristine template.
        let fresh = factory.machine_for("proto").unwrap();
        assert!(!fresh.is_over());
        assert_eq!(fresh.conversation_id(), None);
        assert!(!fresh.role_bindings().is_bound("initiator"));
    }

    #[test]
    fn test_shipped_protocols_load() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/protocols");
        let factory = StateMachineFactory::new().with_resource_dir(dir);
        assert_eq!(factory.prepare().unwrap(), 4);

        let mut known = factory.known_protocols();
        known.sort();
        assert_eq!(
            known,
            vec![
                "fipa-brokering",
                "fipa-contract-net",
                "fipa-query",
                "fipa-request"
            ]
        );

        // Brokering splices the request protocol: 3 own states plus 6
        // embedded ones.
        let brokering = factory.machine_for("fipa-brokering").unwrap();
        assert_eq!(brokering.states().len(), 9);
    }

    #[test]
    fn test_unreadable_resource_dir_is_an_error() {
        let factory =
            StateMachineFactory::new().with_resource_dir("/no/such/directory/anywhere");
        assert!(matches!(
            factory.prepare().unwrap_err(),
            SpecParseError::Io { .. }
        ));
    }
}
