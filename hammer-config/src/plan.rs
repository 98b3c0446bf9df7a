//! Test plan model and loader
//!
//! A test plan is a YAML document naming the hosts under test, the number of
//! virtual clients, how many iterations each client performs and the blocks
//! of actions to replay:
//!
//! ```yaml
//! iterations: 5
//! clients: 2
//! rampup: 0
//! configs:
//!   - hostname: 10.0.0.1
//!     port: 830
//!     username: admin
//!     password: admin
//!     reuseconnection: true
//! blocks:
//!   - type: init
//!     actions:
//!       - netconf:
//!           hostname: 10.0.0.1
//!           operation: edit-config
//!           config: file:snippets/interfaces.xml
//!   - type: concurrent
//!     actions:
//!       - netconf:
//!           hostname: 10.0.0.1
//!           operation: get-config
//!           expected: "<interfaces"
//!       - sleep:
//!           duration: 1
//! ```
//!
//! Once loaded the plan is immutable and shared read-only by every worker.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::inline::inline_snippets;
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// Default NETCONF over SSH port
pub const DEFAULT_PORT: u16 = 830;

/// Top level test plan document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    /// Path the plan was loaded from, if any
    #[serde(skip)]
    pub file: Option<PathBuf>,

    /// Number of times each client replays the blocks
    #[serde(default)]
    pub iterations: u32,

    /// Number of virtual clients
    #[serde(default)]
    pub clients: u32,

    /// Window in seconds over which clients are started
    #[serde(default)]
    pub rampup: u64,

    /// Connection parameters, one entry per host
    #[serde(default)]
    pub configs: Vec<ConnectionConfig>,

    /// Blocks of actions in execution order
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Parameters required to reach a managed device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Cache one session per client for this host instead of dialing per call
    #[serde(default)]
    pub reuseconnection: bool,
}

/// How the actions of a block are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    /// Runs once, sequentially, before any client starts
    Init,
    Sequential,
    Concurrent,
}

/// An ordered group of actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: BlockType,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// A single step of a block
///
/// In YAML an action is a mapping with exactly one of the `netconf` or
/// `sleep` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ActionRepr", into = "ActionRepr")]
pub enum Action {
    RemoteCall(RemoteCall),
    Pause(Pause),
}

/// A NETCONF operation issued against one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub hostname: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    /// edit-config payload; `file:<path>` references are inlined at load time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    /// Regular expression the reply data must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

/// Subtree or xpath filter attached to get/get-config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<String>,
    pub select: String,
}

/// Suspends the issuing client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pause {
    /// Seconds
    pub duration: u64,
}

impl Pause {
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }
}

#[derive(Serialize, Deserialize)]
struct ActionRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    netconf: Option<RemoteCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sleep: Option<Pause>,
}

impl TryFrom<ActionRepr> for Action {
    type Error = String;

    fn try_from(repr: ActionRepr) -> Result<Self, Self::Error> {
        match (repr.netconf, repr.sleep) {
            (Some(call), None) => Ok(Action::RemoteCall(call)),
            (None, Some(pause)) => Ok(Action::Pause(pause)),
            (Some(_), Some(_)) => {
                Err("an action must contain either netconf or sleep, not both".to_string())
            }
            (None, None) => Err(
                "an action must contain netconf or sleep; check the indentation of its body"
                    .to_string(),
            ),
        }
    }
}

impl From<Action> for ActionRepr {
    fn from(action: Action) -> Self {
        match action {
            Action::RemoteCall(call) => ActionRepr {
                netconf: Some(call),
                sleep: None,
            },
            Action::Pause(pause) => ActionRepr {
                netconf: None,
                sleep: Some(pause),
            },
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl TestPlan {
    /// Load, validate and resolve a plan from a YAML file
    ///
    /// Relative `file:` references are resolved against the directory that
    /// contains the plan.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut plan = Self::parse_with_base(&content, base_dir)?;
        plan.file = Some(path.to_path_buf());
        debug!(
            "Loaded test plan {:?}: {} blocks, {} configs",
            path,
            plan.blocks.len(),
            plan.configs.len()
        );
        Ok(plan)
    }

    /// Parse a plan from a YAML string, resolving `file:` references
    /// relative to the current directory
    pub fn parse(content: &str) -> ConfigResult<Self> {
        Self::parse_with_base(content, Path::new("."))
    }

    /// Parse a plan from a YAML string, resolving `file:` references
    /// relative to `base_dir`
    pub fn parse_with_base(content: &str, base_dir: &Path) -> ConfigResult<Self> {
        let mut plan: TestPlan = serde_yaml::from_str(content)?;
        plan.validate()?;
        inline_snippets(&mut plan, base_dir)?;
        Ok(plan)
    }

    /// Serialize the resolved plan back to YAML
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Connection parameters for a host
    pub fn config_for(&self, hostname: &str) -> Option<&ConnectionConfig> {
        self.configs.iter().find(|c| c.hostname == hostname)
    }

    /// The first `init` block; any further init blocks are ignored
    pub fn init_block(&self) -> Option<&Block> {
        self.blocks.iter().find(|b| b.kind == BlockType::Init)
    }

    /// Number of outcome records a complete run of this plan produces,
    /// saturating at `usize::MAX` for plans too long to count
    pub fn expected_outcomes(&self) -> usize {
        let init = self.init_block().map(Block::remote_call_count).unwrap_or(0);
        let per_iteration: usize = self
            .blocks
            .iter()
            .filter(|b| b.kind != BlockType::Init)
            .map(Block::remote_call_count)
            .sum();

        per_iteration
            .saturating_mul(self.iterations as usize)
            .saturating_mul(self.clients as usize)
            .saturating_add(init)
    }
}

impl Block {
    /// Number of remote calls in the block; pauses produce no outcomes
    pub fn remote_call_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::RemoteCall(_)))
            .count()
    }
}

impl Validatable for TestPlan {
    fn validate(&self) -> ConfigResult<()> {
        if self.configs.is_empty() {
            return Err(ConfigError::ValidationError(
                "test plan should contain at least one configs section".to_string(),
            ));
        }

        validate_positive(self.clients, "clients", self.domain_name())?;

        let mut hosts = HashSet::new();
        for config in &self.configs {
            config.validate()?;
            if !hosts.insert(config.hostname.as_str()) {
                return Err(config.validation_error(format!(
                    "hostname {} is defined more than once",
                    config.hostname
                )));
            }
        }

        for block in &self.blocks {
            for action in &block.actions {
                if let Action::RemoteCall(call) = action {
                    call.validate()?;
                    if !hosts.contains(call.hostname.as_str()) {
                        return Err(call.validation_error(format!(
                            "operation has to use a host defined in the configs section, {} is not",
                            call.hostname
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "testsuite"
    }
}

impl Validatable for ConnectionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.hostname, "hostname", self.domain_name())?;
        validate_required_string(&self.username, "username", self.domain_name())?;
        validate_required_string(&self.password, "password", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "ssh config"
    }
}

impl Validatable for RemoteCall {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.operation, "operation", self.domain_name())
    }

    fn domain_name(&self) -> &'static str {
        "netconf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
iterations: 2
clients: 3
rampup: 6
configs:
  - hostname: 10.0.0.1
    port: 830
    username: admin
    password: secret
    reuseconnection: true
  - hostname: "::1"
    username: admin
    password: secret
blocks:
  - type: init
    actions:
      - netconf:
          hostname: 10.0.0.1
          operation: edit-config
          config: <top/>
  - type: sequential
    actions:
      - netconf:
          hostname: 10.0.0.1
          operation: get-config
          filter:
            type: subtree
            ns: urn:example
            select: <interfaces/>
      - sleep:
          duration: 1
  - type: concurrent
    actions:
      - netconf:
          hostname: "::1"
          operation: get
          expected: "<ok/>"
      - netconf:
          hostname: 10.0.0.1
          operation: get
  - type: init
    actions:
      - sleep:
          duration: 9
"#;

    #[test]
    fn test_parse_plan() {
        let plan = TestPlan::parse(PLAN).unwrap();
        assert_eq!(plan.iterations, 2);
        assert_eq!(plan.clients, 3);
        assert_eq!(plan.rampup, 6);
        assert_eq!(plan.blocks.len(), 4);
        assert_eq!(plan.blocks[2].kind, BlockType::Concurrent);

        let v6 = plan.config_for("::1").unwrap();
        assert_eq!(v6.port, DEFAULT_PORT);
        assert!(!v6.reuseconnection);
        assert!(plan.config_for("10.0.0.1").unwrap().reuseconnection);
        assert!(plan.config_for("10.0.0.2").is_none());

        match &plan.blocks[1].actions[0] {
            Action::RemoteCall(call) => {
                let filter = call.filter.as_ref().unwrap();
                assert_eq!(filter.kind, "subtree");
                assert_eq!(filter.ns.as_deref(), Some("urn:example"));
            }
            other => panic!("expected a remote call, got {:?}", other),
        }
        assert_eq!(
            plan.blocks[1].actions[1],
            Action::Pause(Pause { duration: 1 })
        );
    }

    #[test]
    fn test_first_init_block_wins() {
        let plan = TestPlan::parse(PLAN).unwrap();
        let init = plan.init_block().unwrap();
        assert_eq!(init.actions.len(), 1);
        assert!(matches!(init.actions[0], Action::RemoteCall(_)));
    }

    #[test]
    fn test_expected_outcomes() {
        let plan = TestPlan::parse(PLAN).unwrap();
        // 1 init call + (1 sequential + 2 concurrent) * 2 iterations * 3 clients
        assert_eq!(plan.expected_outcomes(), 1 + 3 * 2 * 3);
    }

    #[test]
    fn test_expected_outcomes_saturates() {
        let mut plan = TestPlan::parse(PLAN).unwrap();
        plan.iterations = u32::MAX;
        plan.clients = u32::MAX;
        assert_eq!(plan.expected_outcomes(), usize::MAX);
    }

    #[test]
    fn test_action_without_body_is_rejected() {
        let yaml = r#"
clients: 1
configs:
  - hostname: h
    username: u
    password: p
blocks:
  - type: sequential
    actions:
      - netconf:
        hostname: h
"#;
        let err = TestPlan::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_action_with_both_bodies_is_rejected() {
        let yaml = r#"
clients: 1
configs:
  - hostname: h
    username: u
    password: p
blocks:
  - type: sequential
    actions:
      - netconf:
          hostname: h
          operation: get
        sleep:
          duration: 1
"#;
        assert!(TestPlan::parse(yaml).is_err());
    }

    #[test]
    fn test_unknown_host_is_rejected() {
        let yaml = r#"
clients: 1
configs:
  - hostname: h
    username: u
    password: p
blocks:
  - type: sequential
    actions:
      - netconf:
          hostname: other
          operation: get
"#;
        let err = TestPlan::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("configs section"));
    }

    #[test]
    fn test_empty_operation_is_rejected() {
        let yaml = r#"
clients: 1
configs:
  - hostname: h
    username: u
    password: p
blocks:
  - type: sequential
    actions:
      - netconf:
          hostname: h
          operation: ""
"#;
        let err = TestPlan::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("operation cannot be empty"));
    }

    #[test]
    fn test_config_validation() {
        for (field, yaml) in [
            ("hostname", "hostname: \"\"\n    username: u\n    password: p"),
            ("username", "hostname: h\n    password: p"),
            ("password", "hostname: h\n    username: u"),
        ] {
            let plan = format!("clients: 1\nconfigs:\n  - {}\n", yaml);
            let err = TestPlan::parse(&plan).unwrap_err();
            assert!(
                err.to_string().contains(&format!("{} cannot be empty", field)),
                "unexpected error for {}: {}",
                field,
                err
            );
        }
    }

    #[test]
    fn test_missing_configs_is_rejected() {
        let err = TestPlan::parse("clients: 1\nblocks: []\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_duplicate_hostnames_are_rejected() {
        let yaml = r#"
clients: 1
configs:
  - hostname: h
    username: u
    password: p
  - hostname: h
    username: u2
    password: p2
"#;
        let err = TestPlan::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("defined more than once"));
    }

    #[test]
    fn test_zero_clients_is_rejected() {
        let yaml = "clients: 0\nconfigs:\n  - hostname: h\n    username: u\n    password: p\n";
        assert!(TestPlan::parse(yaml).is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let plan = TestPlan::parse(PLAN).unwrap();
        let yaml = plan.to_yaml().unwrap();
        assert!(yaml.contains("netconf:"));
        assert!(yaml.contains("sleep:"));

        let reparsed = TestPlan::parse(&yaml).unwrap();
        assert_eq!(plan, reparsed);
    }
}
