use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct PluginId(pub String);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One installable plugin as declared in the registry document.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub repository: RepositorySpec,
    /// Package specifiers grouped by ecosystem (`python`, `node`, ...).
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub install_path: Option<PathBuf>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub dev_only: bool,
}

impl PluginDescriptor {
    pub fn display_name<'a>(&'a self, id: &'a PluginId) -> &'a str {
        self.name.as_deref().unwrap_or(&id.0)
    }

    pub fn has_dependencies(&self) -> bool {
        self.dependencies.values().any(|deps| !deps.is_empty())
    }

    /// The install path, if it names a directory strictly below the
    /// project root. Absolute paths, `.` and `..` components are refused.
    pub fn contained_install_path(&self) -> Option<&Path> {
        self.install_path.as_deref().filter(|path| {
            !path.as_os_str().is_empty()
                && path
                    .components()
                    .all(|component| matches!(component, Component::Normal(_)))
        })
    }

    /// Reason this descriptor cannot be installed, if any.
    pub fn missing_install_info(&self) -> Option<String> {
        let url = self.repository.url.trim();
        let path_missing = self
            .install_path
            .as_ref()
            .is_none_or(|path| path.as_os_str().is_empty());

        if !path_missing && self.contained_install_path().is_none() {
            return Some(format!(
                "install_path {} must be a relative path inside the project root",
                self.install_path.as_deref().unwrap_or(Path::new("")).display()
            ));
        }

        match (url.is_empty(), path_missing) {
            (false, false) => None,
            (true, false) => Some("missing repository url".to_string()),
            (false, true) => Some("missing install_path".to_string()),
            (true, true) => Some("missing repository url and install_path".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositorySpec {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub dev_branch: Option<String>,
}

impl RepositorySpec {
    pub fn default_branch(&self) -> &str {
        self.branch
            .as_deref()
            .filter(|branch| !branch.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
    }
}

fn default_enabled() -> bool {
    true
}
