// Shared Models
// Unit paths, provisioning commands, run statuses and failure modes used across the engine

use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Canonical, `/`-separated path of a unit or layer relative to the configuration root
///
/// The root itself is the empty path and displays as `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitPath(String);

impl UnitPath {
    /// Build a canonical path, collapsing `.` and `..` components
    ///
    /// Returns `None` when the path climbs above the root.
    pub fn new(path: impl AsRef<str>) -> Option<Self> {
        normalize(&[], path.as_ref()).map(Self)
    }

    /// The configuration root
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve a reference made from this directory
    ///
    /// References starting with `./` or `../` are relative to `self`; anything else is
    /// canonical from the root.
    pub fn resolve(&self, reference: &str) -> Option<UnitPath> {
        let reference = reference.trim();
        if is_relative(reference) {
            let base: Vec<&str> = self.components().collect();
            normalize(&base, reference).map(Self)
        } else {
            Self::new(reference)
        }
    }

    /// Parent directory, `None` for the root
    pub fn parent(&self) -> Option<UnitPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Some(Self(parent.to_string())),
            None => Some(Self::root()),
        }
    }

    /// Append a single file or directory name
    pub fn join(&self, name: &str) -> UnitPath {
        if self.is_root() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }

    /// Whether `prefix` names this path or one of its ancestors
    pub fn starts_with(&self, prefix: &UnitPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0[prefix.0.len()..].starts_with('/'))
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Location of this path under an on-disk root
    pub fn on_disk(&self, root: &Path) -> PathBuf {
        self.components().fold(root.to_path_buf(), |acc, c| acc.join(c))
    }
}

impl fmt::Display for UnitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn is_relative(reference: &str) -> bool {
    reference == "."
        || reference == ".."
        || reference.starts_with("./")
        || reference.starts_with("../")
}

fn normalize(base: &[&str], reference: &str) -> Option<String> {
    let mut parts: Vec<&str> = base.to_vec();
    for component in reference.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Provisioning command run against each unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Init,
    Validate,
    Plan,
    Apply,
    Destroy,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Init,
        Command::Validate,
        Command::Plan,
        Command::Apply,
        Command::Destroy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::Validate => "validate",
            Command::Plan => "plan",
            Command::Apply => "apply",
            Command::Destroy => "destroy",
        }
    }

    /// Destroy runs walk the graph in reverse dependency order
    pub fn is_reverse_order(&self) -> bool {
        matches!(self, Command::Destroy)
    }

    /// Terminal status a unit reaches when this command completes
    pub fn success_status(&self) -> UnitStatus {
        match self {
            Command::Apply => UnitStatus::Applied,
            Command::Destroy => UnitStatus::Destroyed,
            Command::Init | Command::Validate | Command::Plan => UnitStatus::Succeeded,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "init" => Ok(Command::Init),
            "validate" => Ok(Command::Validate),
            "plan" => Ok(Command::Plan),
            "apply" => Ok(Command::Apply),
            "destroy" => Ok(Command::Destroy),
            _ => Err(format!(
                "Unknown command '{}'. Valid commands: init, validate, plan, apply, destroy",
                s
            )),
        }
    }
}

/// Lifecycle status of one unit within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Ready,
    Running,
    /// Apply completed; real outputs are recorded
    Applied,
    /// Init, validate or plan completed
    Succeeded,
    Destroyed,
    Failed,
    Skipped,
    Cancelled,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            UnitStatus::Pending | UnitStatus::Ready | UnitStatus::Running
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            UnitStatus::Applied | UnitStatus::Succeeded | UnitStatus::Destroyed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Ready => "ready",
            UnitStatus::Running => "running",
            UnitStatus::Applied => "applied",
            UnitStatus::Succeeded => "succeeded",
            UnitStatus::Destroyed => "destroyed",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
            UnitStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the scheduler does with remaining work once a unit fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailMode {
    /// Stop starting new work; in-flight units finish
    #[default]
    FailFast,
    /// Keep going; only dependents of the failed unit are skipped
    BestEffort,
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailMode::FailFast => write!(f, "fail-fast"),
            FailMode::BestEffort => write!(f, "best-effort"),
        }
    }
}

impl FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(FailMode::FailFast),
            "best-effort" | "besteffort" => Ok(FailMode::BestEffort),
            _ => Err(format!(
                "Unknown fail mode '{}'. Valid modes: fail-fast, best-effort",
                s
            )),
        }
    }
}
