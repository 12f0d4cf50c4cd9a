//! The invocation context handed to every playbook run.
//!
//! The context is rendered into one variable mapping that serves both as the
//! engine's extra variables and as the inventory template context:
//!
//! ```json
//! {
//!   "command": ["jupyterhub-singleuser", "--port=8888"],
//!   "server_info": {"ip": "10.0.0.5", "port": 8888},
//!   "user": {"name": "alice", "escaped_name": "alice"},
//!   "spawner_environment": {"JUPYTERHUB_API_URL": "..."},
//!   "...": "caller variables, overriding the keys above"
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use playspawn_types::FactMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Variable holding the launch command.
pub const VAR_COMMAND: &str = "command";
/// Variable holding the current server state.
pub const VAR_SERVER_INFO: &str = "server_info";
/// Variable holding the principal.
pub const VAR_USER: &str = "user";
/// Variable holding the environment snapshot.
pub const VAR_ENVIRONMENT: &str = "spawner_environment";

/// Characters kept verbatim by [`escape_name`] besides ASCII alphanumerics.
const SAFE_CHARS: &[u8] = b"-_.@~";

/// The user on whose behalf a server is managed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    /// Filesystem- and URL-safe form of `name`.
    pub escaped_name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let escaped_name = escape_name(&name);
        Self { name, escaped_name }
    }
}

/// Percent-encode everything except ASCII alphanumerics and `-_.@~`.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || SAFE_CHARS.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Function producing caller variables, evaluated on every context build.
pub type VarsFn = Arc<dyn Fn() -> FactMap + Send + Sync>;

/// Caller-supplied playbook variables: a fixed mapping or a function.
#[derive(Clone)]
pub enum PlaybookVars {
    Static(FactMap),
    Function(VarsFn),
}

impl PlaybookVars {
    /// Produce the current variable mapping.
    pub fn evaluate(&self) -> FactMap {
        match self {
            PlaybookVars::Static(vars) => vars.clone(),
            PlaybookVars::Function(f) => f(),
        }
    }
}

impl Default for PlaybookVars {
    fn default() -> Self {
        PlaybookVars::Static(FactMap::new())
    }
}

impl fmt::Debug for PlaybookVars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybookVars::Static(vars) => f.debug_tuple("Static").field(vars).finish(),
            PlaybookVars::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Everything a run needs to know about the server it acts on.
///
/// Built fresh for each run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationContext {
    /// Launch command followed by its arguments.
    pub command: Vec<String>,
    /// Caller variables.
    pub variables: FactMap,
    /// Snapshot of the server state at build time.
    pub server_info: FactMap,
    /// Environment snapshot for the server process.
    pub environment: BTreeMap<String, String>,
    pub user: Principal,
}

impl InvocationContext {
    pub fn new(user: Principal) -> Self {
        Self {
            command: Vec::new(),
            variables: FactMap::new(),
            server_info: FactMap::new(),
            environment: BTreeMap::new(),
            user,
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_variables(mut self, variables: FactMap) -> Self {
        self.variables = variables;
        self
    }

    /// Add or replace a single caller variable.
    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn with_server_info(mut self, server_info: FactMap) -> Self {
        self.server_info = server_info;
        self
    }

    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Render the variable mapping. Caller variables win over built-in keys.
    pub fn to_vars(&self) -> FactMap {
        let mut vars = FactMap::new();
        vars.insert(VAR_COMMAND.to_string(), Value::from(self.command.clone()));
        vars.insert(
            VAR_SERVER_INFO.to_string(),
            Value::Object(self.server_info.clone()),
        );
        vars.insert(
            VAR_USER.to_string(),
            serde_json::json!({
                "name": self.user.name,
                "escaped_name": self.user.escaped_name,
            }),
        );
        let environment = self
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        vars.insert(VAR_ENVIRONMENT.to_string(), Value::Object(environment));

        for (key, value) in &self.variables {
            vars.insert(key.clone(), value.clone());
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_name() {
        assert_eq!(escape_name("alice"), "alice");
        assert_eq!(escape_name("a.b-c_d@e~f"), "a.b-c_d@e~f");
        assert_eq!(escape_name("first last"), "first%20last");
        assert_eq!(escape_name("a/b"), "a%2Fb");
        assert_eq!(escape_name("é"), "%C3%A9");
    }

    #[test]
    fn test_to_vars_layout() {
        let mut env = BTreeMap::new();
        env.insert("API".to_string(), "http://hub".to_string());
        let mut info = FactMap::new();
        info.insert("ip".to_string(), json!("10.0.0.1"));

        let ctx = InvocationContext::new(Principal::new("user"))
            .with_command(vec!["serve".to_string(), "--port=1".to_string()])
            .with_server_info(info)
            .with_environment(env);

        let vars = ctx.to_vars();
        assert_eq!(vars["command"], json!(["serve", "--port=1"]));
        assert_eq!(vars["server_info"], json!({"ip": "10.0.0.1"}));
        assert_eq!(vars["user"], json!({"name": "user", "escaped_name": "user"}));
        assert_eq!(vars["spawner_environment"], json!({"API": "http://hub"}));
    }

    #[test]
    fn test_caller_variables_win() {
        let ctx = InvocationContext::new(Principal::new("user"))
            .with_variable("user", json!("override"))
            .with_variable("image", json!("base"));
        let vars = ctx.to_vars();
        assert_eq!(vars["user"], json!("override"));
        assert_eq!(vars["image"], json!("base"));
    }

    #[test]
    fn test_playbook_vars_function_is_reevaluated() {
        use std::sync::atomic::{AtomicU64, Ordering};
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let vars = PlaybookVars::Function(Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let mut m = FactMap::new();
            m.insert("n".to_string(), json!(n));
            m
        }));
        assert_eq!(vars.evaluate()["n"], json!(0));
        assert_eq!(vars.evaluate()["n"], json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
