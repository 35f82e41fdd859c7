//! Capabilities: the external effects a role may invoke.
//!
//! Every capability declares a schema of named, typed parameters. The
//! registry checks the calling role's permissions and validates inputs
//! against the schema before anything runs.

mod files;
mod scrape;
mod search;

pub use files::{ListDirectory, ReadFile, Sandbox, WriteFile};
pub use scrape::{extract_text, ScrapeWebsite};
pub use search::{format_results, WebSearch};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::role::{Role, RoleRegistry};
use crate::error::{CapabilityError, ConfigError};
use crate::Result;

/// Type of a capability parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    #[serde(alias = "list")]
    StringList,
}

impl ParamKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        }
    }
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamKind::String => write!(f, "string"),
            ParamKind::Integer => write!(f, "integer"),
            ParamKind::Boolean => write!(f, "boolean"),
            ParamKind::StringList => write!(f, "list of strings"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Declared name, purpose and inputs of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySchema {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl CapabilitySchema {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Check required parameters are present and every declared parameter
    /// has the declared type. Undeclared keys are ignored.
    pub fn validate(&self, input: &Map<String, Value>) -> std::result::Result<(), CapabilityError> {
        for spec in &self.params {
            match input.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(CapabilityError::invalid_input(
                        &self.name,
                        format!("missing required parameter '{}'", spec.name),
                    ));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(CapabilityError::invalid_input(
                        &self.name,
                        format!("parameter '{}' must be a {}", spec.name, spec.kind),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// One-line description used in prompts and listings.
    pub fn describe(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                format!(
                    "\"{}\": {}{} ({})",
                    p.name,
                    p.kind,
                    if p.required { "" } else { ", optional" },
                    p.description
                )
            })
            .collect();
        format!(
            "{}: {} Input: {{{}}}",
            self.name,
            self.description,
            params.join(", ")
        )
    }
}

/// An external effect a role can invoke.
#[async_trait]
pub trait Capability: Send + Sync {
    fn schema(&self) -> CapabilitySchema;

    /// Run the capability. Inputs have already been validated against the
    /// schema.
    async fn invoke(&self, input: &Map<String, Value>) -> std::result::Result<String, CapabilityError>;
}

/// Settings shared by the built-in capabilities.
#[derive(Debug, Clone)]
pub struct CapabilitySettings {
    /// Root directory for the file capabilities.
    pub workspace: PathBuf,
    /// Environment variable holding the search API key.
    pub search_api_key_env: String,
    pub search_endpoint: String,
    pub scrape_max_chars: usize,
    pub http_timeout: Duration,
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            search_api_key_env: search::DEFAULT_API_KEY_ENV.to_string(),
            search_endpoint: search::DEFAULT_ENDPOINT.to_string(),
            scrape_max_chars: scrape::DEFAULT_MAX_CHARS,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Name-keyed capability adapters.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, (CapabilitySchema, Arc<dyn Capability>)>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in capability.
    pub fn builtin(settings: &CapabilitySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .user_agent(concat!("crewflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let sandbox = Sandbox::new(&settings.workspace);

        let mut registry = Self::new();
        registry.register(Arc::new(WebSearch::new(
            client.clone(),
            &settings.search_endpoint,
            &settings.search_api_key_env,
        )));
        registry.register(Arc::new(ScrapeWebsite::new(client, settings.scrape_max_chars)));
        registry.register(Arc::new(ReadFile::new(sandbox.clone())));
        registry.register(Arc::new(WriteFile::new(sandbox.clone())));
        registry.register(Arc::new(ListDirectory::new(sandbox)));
        Ok(registry)
    }

    /// Register an adapter, replacing any adapter with the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let schema = capability.schema();
        self.capabilities
            .insert(schema.name.clone(), (schema, capability));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<&CapabilitySchema> {
        self.capabilities.get(name).map(|(schema, _)| schema)
    }

    /// Schemas sorted by name.
    pub fn schemas(&self) -> impl Iterator<Item = &CapabilitySchema> {
        self.capabilities.values().map(|(schema, _)| schema)
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Every capability a role lists must be registered.
    pub fn check_roles(&self, roles: &RoleRegistry) -> std::result::Result<(), ConfigError> {
        for role in roles.iter() {
            if let Some(unknown) = role.capabilities.iter().find(|c| !self.contains(c)) {
                return Err(ConfigError::UnknownCapability {
                    role: role.name.clone(),
                    capability: unknown.clone(),
                });
            }
        }
        Ok(())
    }

    /// Invoke `name` on behalf of `role`.
    ///
    /// # Errors
    /// `Unknown` for an unregistered name, `NotPermitted` when the role does
    /// not list the capability, `InvalidInput` when the input is not an
    /// object matching the schema, and whatever the adapter reports.
    pub async fn invoke(
        &self,
        role: &Role,
        name: &str,
        input: &Value,
    ) -> std::result::Result<String, CapabilityError> {
        let (schema, capability) = self
            .capabilities
            .get(name)
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))?;
        if !role.allows(name) {
            return Err(CapabilityError::NotPermitted {
                role: role.name.clone(),
                capability: name.to_string(),
            });
        }
        let empty = Map::new();
        let input = match input {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(CapabilityError::invalid_input(
                    name,
                    "input must be a JSON object",
                ))
            }
        };
        schema.validate(input)?;

        tracing::debug!(role = %role.name, capability = name, "invoking capability");
        let result = capability.invoke(input).await;
        if let Err(e) = &result {
            tracing::warn!(role = %role.name, capability = name, error = %e, "capability failed");
        }
        result
    }
}

/// Fetch a string parameter that the schema already marked required.
pub(crate) fn str_param<'a>(
    capability: &str,
    input: &'a Map<String, Value>,
    name: &str,
) -> std::result::Result<&'a str, CapabilityError> {
    input
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| CapabilityError::invalid_input(capability, format!("missing '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Capability for Echo {
        fn schema(&self) -> CapabilitySchema {
            CapabilitySchema::new("echo", "Repeat the text.")
                .param(ParamSpec::required("text", ParamKind::String, "text to repeat"))
                .param(ParamSpec::optional("times", ParamKind::Integer, "repeat count"))
        }

        async fn invoke(&self, input: &Map<String, Value>) -> std::result::Result<String, CapabilityError> {
            let text = str_param("echo", input, "text")?;
            let times = input.get("times").and_then(Value::as_u64).unwrap_or(1) as usize;
            Ok(text.repeat(times))
        }
    }

    fn registry() -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(Echo));
        registry
    }

    fn role() -> Role {
        Role::new("Writer", "write", "a writer").with_capability("echo")
    }

    #[tokio::test]
    async fn test_invoke_permitted() {
        let out = registry()
            .invoke(&role(), "echo", &json!({"text": "ab", "times": 2}))
            .await
            .unwrap();
        assert_eq!(out, "abab");
    }

    #[tokio::test]
    async fn test_invoke_unknown() {
        let err = registry()
            .invoke(&role(), "teleport", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, CapabilityError::Unknown("teleport".to_string()));
    }

    #[tokio::test]
    async fn test_invoke_not_permitted() {
        let outsider = Role::new("Editor", "edit", "an editor");
        let err = registry()
            .invoke(&outsider, "echo", &json!({"text": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::NotPermitted { ref role, .. } if role == "Editor"));
    }

    #[tokio::test]
    async fn test_invoke_missing_required_param() {
        let err = registry()
            .invoke(&role(), "echo", &json!({"times": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidInput { ref reason, .. } if reason.contains("text")));
    }

    #[tokio::test]
    async fn test_invoke_wrong_type() {
        let err = registry()
            .invoke(&role(), "echo", &json!({"text": "x", "times": "two"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidInput { ref reason, .. } if reason.contains("integer")));
    }

    #[tokio::test]
    async fn test_invoke_non_object_input() {
        let err = registry()
            .invoke(&role(), "echo", &json!(["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidInput { .. }));
    }

    #[test]
    fn test_check_roles_rejects_unknown_capability() {
        let roles = RoleRegistry::from_roles(vec![
            role(),
            Role::new("Spy", "spy", "a spy").with_capability("teleport"),
        ])
        .unwrap();
        let err = registry().check_roles(&roles).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownCapability {
                role: "Spy".to_string(),
                capability: "teleport".to_string(),
            }
        );
    }

    #[test]
    fn test_string_list_kind() {
        assert!(ParamKind::StringList.accepts(&json!(["ev", "rust"])));
        assert!(ParamKind::StringList.accepts(&json!([])));
        assert!(!ParamKind::StringList.accepts(&json!(["ev", 3])));
        assert!(!ParamKind::StringList.accepts(&json!("ev")));
        let kind: ParamKind = serde_yaml::from_str("list").unwrap();
        assert_eq!(kind, ParamKind::StringList);
        assert_eq!(kind.to_string(), "list of strings");
    }

    #[test]
    fn test_describe() {
        let described = Echo.schema().describe();
        assert!(described.starts_with("echo: Repeat the text."));
        assert!(described.contains("\"text\": string (text to repeat)"));
        assert!(described.contains("\"times\": integer, optional"));
    }

    #[test]
    fn test_builtin_registry_names() {
        let registry = CapabilityRegistry::builtin(&CapabilitySettings::default()).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "list_directory",
                "read_file",
                "scrape_website",
                "web_search",
                "write_file"
            ]
        );
    }
}
