use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::environment::Environment;
use crate::plugin::manifest::{PluginDescriptor, PluginId};

pub const DEFAULT_CONFIG_FILE: &str = "plugins-config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {path} could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is malformed: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Plugin registry plus environment profiles, loaded once per run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Registry {
    /// Plugins in document order.
    #[serde(deserialize_with = "ordered_plugins")]
    pub plugins: Vec<(PluginId, PluginDescriptor)>,
    pub environments: HashMap<String, EnvironmentProfile>,
    #[serde(rename = "config")]
    pub settings: ProvisioningSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnvironmentProfile {
    /// Only required plugins are eligible.
    pub skip_optional: bool,
    /// `dev_only` plugins are eligible.
    pub include_dev_plugins: bool,
    /// Prefer a plugin's `dev_branch` when it declares one.
    pub use_dev_branches: bool,
}

impl Default for EnvironmentProfile {
    fn default() -> Self {
        Self {
            skip_optional: false,
            include_dev_plugins: true,
            use_dev_branches: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisioningSettings {
    /// Host dependency script, relative to the project root.
    pub host_script: PathBuf,
    /// Interpreter that runs `host_script`.
    pub interpreter: String,
    /// Command prefix per dependency ecosystem; package specifiers are appended.
    pub package_managers: BTreeMap<String, Vec<String>>,
    pub timeout_secs: u64,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        let mut package_managers = BTreeMap::new();
        package_managers.insert(
            "python".to_string(),
            vec![
                "python3".to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
            ],
        );
        package_managers.insert(
            "node".to_string(),
            vec!["npm".to_string(), "install".to_string()],
        );

        Self {
            host_script: PathBuf::from("py").join("setup.py"),
            interpreter: "python3".to_string(),
            package_managers,
            timeout_secs: 300,
        }
    }
}

impl ProvisioningSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Registry {
    /// Load the registry, degrading to an empty one when the document is
    /// missing or malformed.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(registry) => registry,
            Err(err) => {
                tracing::warn!("{err}; continuing with an empty plugin registry");
                Self::default()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let registry = Self::parse(path, &raw)?;
        registry.validate();
        tracing::info!(
            plugins = registry.plugins.len(),
            environments = registry.environments.len(),
            "loaded plugin registry from {}",
            path.display()
        );
        Ok(registry)
    }

    fn parse(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let parsed = if is_toml {
            toml::from_str::<Registry>(raw).map_err(|err| err.to_string())
        } else {
            serde_json::from_str::<Registry>(raw).map_err(|err| err.to_string())
        };

        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Profile for `environment`, or the default profile when the document
    /// does not declare one.
    pub fn profile(&self, environment: Environment) -> EnvironmentProfile {
        match self.environments.get(environment.label()) {
            Some(profile) => profile.clone(),
            None => {
                tracing::debug!(%environment, "no profile declared, using defaults");
                EnvironmentProfile::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Warns about entries that will misbehave at install time. Nothing here
    /// rejects the document.
    fn validate(&self) {
        let mut owners: HashMap<&Path, &PluginId> = HashMap::new();

        for (id, descriptor) in &self.plugins {
            if let Some(reason) = descriptor.missing_install_info() {
                tracing::warn!(plugin = %id, "{reason}");
            }

            let Some(path) = descriptor.install_path.as_deref() else {
                continue;
            };

            if let Some(previous) = owners.insert(path, id) {
                tracing::warn!(
                    plugin = %id,
                    other = %previous,
                    "install_path {} is shared; the later install overwrites the earlier one",
                    path.display()
                );
            }
        }
    }
}

fn ordered_plugins<'de, D>(deserializer: D) -> Result<Vec<(PluginId, PluginDescriptor)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedPlugins;

    impl<'de> Visitor<'de> for OrderedPlugins {
        type Value = Vec<(PluginId, PluginDescriptor)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of plugin key to plugin descriptor")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut plugins = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((id, descriptor)) = map.next_entry::<PluginId, PluginDescriptor>()? {
                plugins.push((id, descriptor));
            }
            Ok(plugins)
        }
    }

    deserializer.deserialize_map(OrderedPlugins)
}
