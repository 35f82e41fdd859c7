//! Roles and the role registry.
//!
//! A role is a named persona with an objective and the set of capabilities
//! it may invoke while working on a task. Roles are immutable once loaded.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::core::source::{non_blank, Document, Entries, Named};
use crate::error::ConfigError;
use crate::Result;

/// A role as written in configuration.
///
/// Crew-style field names are accepted as aliases (`goal`, `backstory`,
/// `tools`, `max_iter`, and `role` for the display title). Unknown keys are
/// rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "role")]
    pub title: Option<String>,
    #[serde(default, alias = "goal")]
    pub objective: Option<String>,
    #[serde(default, alias = "backstory")]
    pub persona: Option<String>,
    #[serde(default, alias = "tools")]
    pub capabilities: Vec<String>,
    #[serde(default, alias = "max_iter")]
    pub max_capability_calls: Option<usize>,
    /// Backend requests per minute for this role.
    #[serde(default)]
    pub max_rpm: Option<u32>,
    #[serde(default)]
    pub inject_date: bool,
}

impl Named for RoleDef {
    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }
}

/// A loaded role. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub name: String,
    pub title: Option<String>,
    pub objective: String,
    pub persona: String,
    pub capabilities: BTreeSet<String>,
    /// Per-task capability budget; falls back to the executor default.
    pub max_capability_calls: Option<usize>,
    pub max_rpm: Option<u32>,
    /// Tell the backend today's date.
    pub inject_date: bool,
}

impl Role {
    /// Build a role, checking required fields.
    ///
    /// `position` identifies unnamed entries in error messages.
    pub fn from_def(def: RoleDef, position: usize) -> std::result::Result<Self, ConfigError> {
        let name = non_blank(def.name).ok_or_else(|| ConfigError::MissingField {
            kind: "role",
            entry: format!("#{}", position + 1),
            field: "name",
        })?;
        let objective = non_blank(def.objective).ok_or_else(|| ConfigError::MissingField {
            kind: "role",
            entry: name.clone(),
            field: "objective",
        })?;
        let persona = non_blank(def.persona).ok_or_else(|| ConfigError::MissingField {
            kind: "role",
            entry: name.clone(),
            field: "persona",
        })?;

        Ok(Self {
            name,
            title: non_blank(def.title),
            objective,
            persona,
            capabilities: def.capabilities.into_iter().collect(),
            max_capability_calls: def.max_capability_calls,
            max_rpm: def.max_rpm.filter(|&rpm| rpm > 0),
            inject_date: def.inject_date,
        })
    }

    /// Convenience constructor for roles built in code.
    pub fn new(name: &str, objective: &str, persona: &str) -> Self {
        Self {
            name: name.to_string(),
            title: None,
            objective: objective.to_string(),
            persona: persona.to_string(),
            capabilities: BTreeSet::new(),
            max_capability_calls: None,
            max_rpm: None,
            inject_date: false,
        }
    }

    /// Add an allowed capability.
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.insert(capability.to_string());
        self
    }

    /// Set the per-task capability budget.
    pub fn with_max_capability_calls(mut self, max: usize) -> Self {
        self.max_capability_calls = Some(max);
        self
    }

    pub fn with_max_rpm(mut self, rpm: u32) -> Self {
        self.max_rpm = Some(rpm);
        self
    }

    /// Whether this role may invoke the named capability.
    pub fn allows(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Title shown to the backend; defaults to the name.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// A roles file with the definitions under a `roles` key.
#[derive(Deserialize)]
struct RoleFile {
    roles: Entries<RoleDef>,
}

/// Name-keyed roles in configuration order.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: Vec<Role>,
    index: HashMap<String, usize>,
}

impl RoleRegistry {
    /// Load roles from a YAML or TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let doc = Document::read(path)?;
        let defs = if doc.has_key("roles") {
            doc.parse::<RoleFile>()?.roles
        } else {
            doc.parse::<Entries<RoleDef>>()?
        };
        Ok(Self::from_defs(defs.into_inner())?)
    }

    /// Build the registry from parsed definitions.
    ///
    /// # Errors
    /// `MissingField` for an incomplete entry, `DuplicateRole` when two
    /// entries share a name.
    pub fn from_defs(defs: Vec<RoleDef>) -> std::result::Result<Self, ConfigError> {
        let mut registry = Self::default();
        for (position, def) in defs.into_iter().enumerate() {
            registry.insert(Role::from_def(def, position)?)?;
        }
        tracing::debug!(roles = registry.len(), "role registry loaded");
        Ok(registry)
    }

    /// Build the registry from roles constructed in code.
    pub fn from_roles(roles: Vec<Role>) -> std::result::Result<Self, ConfigError> {
        let mut registry = Self::default();
        for role in roles {
            registry.insert(role)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, role: Role) -> std::result::Result<(), ConfigError> {
        if self.index.contains_key(&role.name) {
            return Err(ConfigError::DuplicateRole(role.name));
        }
        self.index.insert(role.name.clone(), self.roles.len());
        self.roles.push(role);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Role> {
        self.index.get(name).map(|&i| &self.roles[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Roles in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::{parse, ConfigFormat};

    fn def(name: &str) -> RoleDef {
        RoleDef {
            name: Some(name.to_string()),
            objective: Some(format!("{} objective", name)),
            persona: Some(format!("{} persona", name)),
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_from_defs() {
        let registry = RoleRegistry::from_defs(vec![def("writer"), def("editor")]).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("writer"));
        assert_eq!(registry.get("editor").unwrap().objective, "editor objective");
        let names: Vec<_> = registry.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["writer", "editor"]);
    }

    #[test]
    fn test_duplicate_role_rejected() {
        let err = RoleRegistry::from_defs(vec![def("writer"), def("writer")]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateRole("writer".to_string()));
    }

    #[test]
    fn test_missing_objective_rejected() {
        let mut incomplete = def("writer");
        incomplete.objective = None;
        let err = RoleRegistry::from_defs(vec![incomplete]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingField {
                kind: "role",
                entry: "writer".to_string(),
                field: "objective",
            }
        );
    }

    #[test]
    fn test_blank_persona_rejected() {
        let mut incomplete = def("writer");
        incomplete.persona = Some("   ".to_string());
        let err = RoleRegistry::from_defs(vec![incomplete]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "persona", .. }));
    }

    #[test]
    fn test_missing_name_reports_position() {
        let mut unnamed = def("x");
        unnamed.name = None;
        let err = RoleRegistry::from_defs(vec![def("a"), unnamed]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref entry, field: "name", .. } if entry == "#2"));
    }

    #[test]
    fn test_crew_style_aliases() {
        let yaml = r#"
head_of_marketing:
  role: Head of Marketing
  goal: Lead the marketing strategy for {product_name}
  backstory: A seasoned marketer.
  tools: [web_search, scrape_website]
  max_iter: 3
  max_rpm: 3
  inject_date: true
"#;
        let entries: Entries<RoleDef> = parse(yaml, ConfigFormat::Yaml, "agents.yaml").unwrap();
        let registry = RoleRegistry::from_defs(entries.into_inner()).unwrap();
        let role = registry.get("head_of_marketing").unwrap();
        assert_eq!(role.display_title(), "Head of Marketing");
        assert!(role.allows("web_search"));
        assert!(!role.allows("write_file"));
        assert_eq!(role.max_capability_calls, Some(3));
        assert_eq!(role.max_rpm, Some(3));
        assert!(role.inject_date);
    }

    #[test]
    fn test_misspelled_field_rejected() {
        let yaml = "writer:\n  goal: write\n  backstory: a writer\n  capabilites: [read_file]\n";
        let err = parse::<Entries<RoleDef>>(yaml, ConfigFormat::Yaml, "agents.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref message, .. } if message.contains("capabilites")));
    }

    #[test]
    fn test_load_wrapped_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.toml");
        std::fs::write(
            &path,
            "[[roles]]\nname = \"writer\"\nobjective = \"write\"\npersona = \"a writer\"\ncapabilities = [\"read_file\"]\n",
        )
        .unwrap();
        let registry = RoleRegistry::load(&path).unwrap();
        assert!(registry.get("writer").unwrap().allows("read_file"));
    }

    #[test]
    fn test_role_builder() {
        let role = Role::new("writer", "write", "a writer")
            .with_capability("web_search")
            .with_max_capability_calls(2)
            .with_max_rpm(10);
        assert!(role.allows("web_search"));
        assert_eq!(role.max_capability_calls, Some(2));
        assert_eq!(role.max_rpm, Some(10));
        assert_eq!(role.display_title(), "writer");
    }
}
