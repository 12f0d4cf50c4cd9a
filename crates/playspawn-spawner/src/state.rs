//! Server state and its persisted form.
//!
//! The state is whatever the playbooks reported through the output fact. It
//! must carry `ip` and `port` once a start completes. The host persists it as
//! a blob with the state under a single reserved key:
//!
//! ```json
//! {"server_info": {"ip": "10.0.0.5", "port": 8888}}
//! ```

use std::fmt;

use playspawn_types::FactMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SpawnerError};

/// Reserved key of the state in the persisted blob.
pub const STATE_KEY: &str = "server_info";

/// Field holding the server address.
pub const IP_FIELD: &str = "ip";

/// Field holding the server port.
pub const PORT_FIELD: &str = "port";

/// Where a started server can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Facts describing the managed server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerState(FactMap);

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_facts(facts: FactMap) -> Self {
        Self(facts)
    }

    pub fn facts(&self) -> &FactMap {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Shallow-merge `facts` into the state; incoming keys win.
    pub fn merge(&mut self, facts: FactMap) {
        self.0.extend(facts);
    }

    /// Read the endpoint out of the state.
    ///
    /// The port may be a number or a numeric string.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let ip = match self.0.get(IP_FIELD) {
            Some(Value::String(ip)) if !ip.is_empty() => ip.clone(),
            _ => {
                return Err(SpawnerError::MissingEndpoint {
                    field: IP_FIELD.to_string(),
                });
            }
        };
        let port = match self.0.get(PORT_FIELD) {
            None | Some(Value::Null) => {
                return Err(SpawnerError::MissingEndpoint {
                    field: PORT_FIELD.to_string(),
                });
            }
            Some(value) => parse_port(value)?,
        };
        Ok(Endpoint { ip, port })
    }

    /// The persisted blob. Empty when there is no state.
    pub fn to_blob(&self) -> FactMap {
        let mut blob = FactMap::new();
        if !self.is_empty() {
            blob.insert(STATE_KEY.to_string(), Value::Object(self.0.clone()));
        }
        blob
    }

    /// Restore from a persisted blob. Anything but a mapping under the
    /// reserved key yields an empty state.
    pub fn from_blob(blob: &FactMap) -> Self {
        match blob.get(STATE_KEY) {
            Some(Value::Object(facts)) => Self(facts.clone()),
            _ => Self::default(),
        }
    }
}

fn parse_port(value: &Value) -> Result<u16> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| SpawnerError::InvalidPort(value.to_string()))
}
