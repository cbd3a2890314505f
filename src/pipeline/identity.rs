use crate::record::Fields;
use serde_json::Value;
use std::path::Path;

pub const FIELD_KEY_HOST: &str = "host";
pub const FIELD_KEY_PROCESS: &str = "process";
pub const FIELD_KEY_NODE: &str = "nodename";

const NODE_NAME_ENV: &str = "MY_NODE_NAME";

/// Process, host and node names stamped on everything shipped to the
/// broker. Resolved once and never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    process: String,
    host: String,
    node: String,
}

impl Identity {
    pub fn new(
        process: impl Into<String>,
        host: impl Into<String>,
        node: impl Into<String>,
    ) -> Self {
        Self {
            process: process.into(),
            host: host.into(),
            node: node.into(),
        }
    }

    pub fn resolve() -> Self {
        let process = std::env::args()
            .next()
            .and_then(|arg0| {
                Path::new(&arg0)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
            })
            .unwrap_or_default();
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let node = std::env::var(NODE_NAME_ENV).unwrap_or_default();

        Self::new(process, host, node)
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Inserts the identity fields that `fields` does not already carry.
    pub fn enrich(&self, fields: &mut Fields) {
        for (key, value) in [
            (FIELD_KEY_HOST, &self.host),
            (FIELD_KEY_PROCESS, &self.process),
            (FIELD_KEY_NODE, &self.node),
        ] {
            fields
                .entry(key)
                .or_insert_with(|| Value::String(value.clone()));
        }
    }
}
