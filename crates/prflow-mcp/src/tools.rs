//! MCP tool definitions.
//!
//! Tools are a closed set ([`ToolKind`]). The [`ToolRegistry`] decides which of
//! them are advertised, renders their descriptors and maps incoming tool names
//! back to a kind.

use prflow_core::{Error, Instance, InstanceRegistry, Result};
use prflow_storage::DEFAULT_LOG_CAPACITY;
use serde_json::{json, Value};

use crate::protocol::ToolDefinition;

/// Default page size of the `logs` tool.
pub const DEFAULT_LOGS_LIMIT: usize = 50;

/// Largest page the `logs` tool accepts.
pub const MAX_LOGS_LIMIT: usize = DEFAULT_LOG_CAPACITY;

/// Tools served by prflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Create a pull request and run the configured follow-up steps
    Pr,
    /// Return the current access token
    Token,
    /// Page through the operation log
    Logs,
    /// Start mirroring the operation log to a directory
    SetLogDir,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Pr,
        ToolKind::Token,
        ToolKind::Logs,
        ToolKind::SetLogDir,
    ];

    /// Name without any instance prefix.
    pub fn base_name(&self) -> &'static str {
        match self {
            ToolKind::Pr => "pr",
            ToolKind::Token => "token",
            ToolKind::Logs => "logs",
            ToolKind::SetLogDir => "set_log_dir",
        }
    }

    pub fn from_base_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.base_name() == name)
    }

    /// Whether the tool acts on one instance and accepts `repo`.
    pub fn targets_instance(&self) -> bool {
        matches!(self, ToolKind::Pr | ToolKind::Token)
    }
}

/// Advertised tools and their descriptors.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    /// `<active-key>_` in multi-instance mode
    prefix: Option<String>,
    kinds: Vec<ToolKind>,
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Build the registry for a set of instances.
    ///
    /// `set_log_dir` is advertised only when no log directory is configured.
    pub fn new(instances: &InstanceRegistry, log_dir_configured: bool) -> Result<Self> {
        let prefix = instances
            .is_multi()
            .then(|| format!("{}_", instances.default_instance().key));

        let kinds: Vec<ToolKind> = ToolKind::ALL
            .into_iter()
            .filter(|kind| *kind != ToolKind::SetLogDir || !log_dir_configured)
            .collect();

        let definitions = kinds
            .iter()
            .map(|kind| ToolDefinition {
                name: advertised_name(prefix.as_deref(), *kind),
                description: description(*kind, instances),
                input_schema: input_schema(*kind, instances),
            })
            .collect();

        let registry = Self {
            prefix,
            kinds,
            definitions,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Every advertised name must resolve back to exactly its own kind.
    fn validate(&self) -> Result<()> {
        for (kind, definition) in self.kinds.iter().zip(&self.definitions) {
            let resolved = self.resolve(&definition.name)?;
            if resolved != *kind {
                return Err(Error::Config(format!(
                    "Tool '{}' resolves to '{}' instead of '{}'",
                    definition.name,
                    resolved.base_name(),
                    kind.base_name()
                )));
            }
            if self
                .definitions
                .iter()
                .filter(|other| other.name == definition.name)
                .count()
                > 1
            {
                return Err(Error::Config(format!(
                    "Tool '{}' is advertised twice",
                    definition.name
                )));
            }
        }
        Ok(())
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Map a called tool name to an advertised kind.
    ///
    /// The active prefix is stripped when present.
    pub fn resolve(&self, name: &str) -> Result<ToolKind> {
        let base = self
            .prefix
            .as_deref()
            .and_then(|prefix| name.strip_prefix(prefix))
            .unwrap_or(name);

        ToolKind::from_base_name(base)
            .filter(|kind| self.kinds.contains(kind))
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }
}

fn advertised_name(prefix: Option<&str>, kind: ToolKind) -> String {
    match prefix {
        Some(prefix) => format!("{}{}", prefix, kind.base_name()),
        None => kind.base_name().to_string(),
    }
}

fn workflow_summary(instance: &Instance) -> String {
    let mut steps = Vec::new();
    if instance.auto_review {
        steps.push("review");
    }
    if instance.auto_test {
        steps.push("test");
    }
    if instance.auto_merge {
        steps.push("merge");
    }

    let mut summary = format!(
        "{} from {} into {}",
        instance.full_name(),
        instance.head_display,
        instance.base_display
    );
    if !steps.is_empty() {
        summary.push_str(&format!(", then {}", steps.join(", ")));
    }
    summary
}

fn description(kind: ToolKind, instances: &InstanceRegistry) -> String {
    match kind {
        ToolKind::Pr if instances.is_multi() => {
            let targets: Vec<String> = instances
                .iter()
                .map(|instance| format!("{}: {}", instance.key, workflow_summary(instance)))
                .collect();
            format!(
                "Create a pull request on the instance selected by `repo` (default {}). {}",
                instances.default_instance().key,
                targets.join("; ")
            )
        }
        ToolKind::Pr => format!(
            "Create a pull request on {}",
            workflow_summary(instances.default_instance())
        ),
        ToolKind::Token => "Get the current access token for the instance".to_string(),
        ToolKind::Logs => "List recent operations, newest first".to_string(),
        ToolKind::SetLogDir => {
            "Mirror every following operation as JSON lines into a directory".to_string()
        }
    }
}

fn repo_property(instances: &InstanceRegistry) -> Value {
    json!({
        "type": "string",
        "enum": instances.keys(),
        "description": format!(
            "Target instance key (default: {})",
            instances.default_instance().key
        )
    })
}

fn input_schema(kind: ToolKind, instances: &InstanceRegistry) -> Value {
    let mut schema = match kind {
        ToolKind::Pr => json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Pull request title"
                },
                "body": {
                    "type": "string",
                    "description": "Pull request description (default: empty)"
                },
                "draft": {
                    "type": ["boolean", "string"],
                    "description": "Open as draft (true or \"true\")"
                }
            },
            "required": ["title"]
        }),
        ToolKind::Token => json!({
            "type": "object",
            "properties": {}
        }),
        ToolKind::Logs => json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": format!("Maximum number of entries (default: {})", DEFAULT_LOGS_LIMIT),
                    "minimum": 1,
                    "maximum": MAX_LOGS_LIMIT
                },
                "offset": {
                    "type": "integer",
                    "description": "Number of newest entries to skip (default: 0)",
                    "minimum": 0
                }
            }
        }),
        ToolKind::SetLogDir => json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to write the operation log into"
                }
            },
            "required": ["path"]
        }),
    };

    if kind.targets_instance() && instances.is_multi() {
        schema["properties"]["repo"] = repo_property(instances);
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use prflow_core::Credentials;

    fn instance(repo: &str) -> Instance {
        Instance::new(
            "acme",
            repo,
            "dev",
            "master",
            Credentials::new("bot", "pw", "cid", "cs"),
        )
    }

    fn single() -> InstanceRegistry {
        InstanceRegistry::new(vec![instance("web").with_flags(true, true, true)]).unwrap()
    }

    fn multi() -> InstanceRegistry {
        InstanceRegistry::new(vec![instance("web"), instance("mobile-app")]).unwrap()
    }

    fn names(registry: &ToolRegistry) -> Vec<&str> {
        registry
            .definitions()
            .iter()
            .map(|d| d.name.as_str())
            .collect()
    }

    #[test]
    fn test_kind_names() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_base_name(kind.base_name()), Some(kind));
        }
        assert_eq!(ToolKind::from_base_name("merge"), None);
    }

    #[test]
    fn test_single_instance_names() {
        let registry = ToolRegistry::new(&single(), false).unwrap();
        assert_eq!(names(&registry), vec!["pr", "token", "logs", "set_log_dir"]);
        assert!(registry.prefix().is_none());
    }

    #[test]
    fn test_set_log_dir_hidden_when_configured() {
        let registry = ToolRegistry::new(&single(), true).unwrap();
        assert_eq!(names(&registry), vec!["pr", "token", "logs"]);
        assert!(matches!(
            registry.resolve("set_log_dir"),
            Err(Error::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_multi_instance_prefix() {
        let registry = ToolRegistry::new(&multi(), true).unwrap();
        assert_eq!(names(&registry), vec!["web_pr", "web_token", "web_logs"]);

        assert_eq!(registry.resolve("web_pr").unwrap(), ToolKind::Pr);
        assert_eq!(registry.resolve("pr").unwrap(), ToolKind::Pr);
        assert!(registry.resolve("mobile-app_pr").is_err());
        assert!(registry.resolve("web_merge").is_err());
    }

    #[test]
    fn test_repo_enum_only_in_multi_mode() {
        let registry = ToolRegistry::new(&multi(), false).unwrap();
        let pr = &registry.definitions()[0];
        assert_eq!(
            pr.input_schema["properties"]["repo"]["enum"],
            json!(["web", "mobile-app"])
        );
        let logs = &registry.definitions()[2];
        assert!(logs.input_schema["properties"].get("repo").is_none());

        let registry = ToolRegistry::new(&single(), false).unwrap();
        assert!(registry.definitions()[0].input_schema["properties"]
            .get("repo")
            .is_none());
    }

    #[test]
    fn test_pr_description_uses_display_branches() {
        let registry = ToolRegistry::new(&single(), false).unwrap();
        let description = &registry.definitions()[0].description;
        assert!(description.contains("acme/web"));
        assert!(description.contains("branch (dev)"));
        assert!(description.contains("branch (master)"));
        assert!(description.contains("review, test, merge"));
    }

    #[test]
    fn test_unknown_tool() {
        let registry = ToolRegistry::new(&single(), false).unwrap();
        match registry.resolve("delete_repo") {
            Err(Error::ToolNotFound(name)) => assert_eq!(name, "delete_repo"),
            other => panic!("expected ToolNotFound, got {:?}", other),
        }
    }
}
