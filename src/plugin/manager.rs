use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::model::config::{EnvironmentProfile, Registry};
use crate::model::environment::Environment;
use crate::plugin::error::InstallError;
use crate::plugin::installer::RepositoryFetcher;
use crate::plugin::manifest::{PluginDescriptor, PluginId};
use crate::plugin::outcome::{CleanSummary, InstallOutcome, InstallSummary};
use crate::plugin::policy;
use crate::plugin::provision::DependencyProvisioner;

/// Read-only view of one configured plugin.
#[derive(Debug)]
pub struct PluginListing<'a> {
    pub id: &'a PluginId,
    pub descriptor: &'a PluginDescriptor,
    pub enabled: bool,
    pub required: bool,
    pub installed: bool,
}

/// Drives install, list and clean over the whole registry, one plugin at a
/// time in registry order.
pub struct PluginManager {
    registry: Registry,
    environment: Environment,
    profile: EnvironmentProfile,
    root: PathBuf,
    fetcher: RepositoryFetcher,
    provisioner: DependencyProvisioner,
}

impl PluginManager {
    pub fn new(registry: Registry, environment: Environment, root: PathBuf) -> Self {
        let fetcher = RepositoryFetcher::from_host();
        let provisioner = DependencyProvisioner::new(root.clone(), registry.settings.clone());
        Self::with_parts(registry, environment, root, fetcher, provisioner)
    }

    pub fn with_parts(
        registry: Registry,
        environment: Environment,
        root: PathBuf,
        fetcher: RepositoryFetcher,
        provisioner: DependencyProvisioner,
    ) -> Self {
        let profile = registry.profile(environment);
        Self {
            registry,
            environment,
            profile,
            root,
            fetcher,
            provisioner,
        }
    }

    pub fn plugin_count(&self) -> usize {
        self.registry.plugins.len()
    }

    pub fn install_all(&self) -> InstallSummary {
        println!("[INSTALL] Starting plugin installation ({})", self.environment);
        let mut summary = InstallSummary::default();

        if self.registry.is_empty() {
            println!("[INFO] No plugins configured");
            return summary;
        }

        for (id, descriptor) in &self.registry.plugins {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.install_plugin(id, descriptor)
            }))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                println!("[ERROR] Unexpected error installing {id}: {message}");
                tracing::error!(plugin = %id, "install panicked: {message}");
                InstallOutcome::Failed(InstallError::Unexpected(message))
            });

            tracing::info!(plugin = %id, outcome = outcome.label(), "plugin processed");
            summary.record(id.clone(), outcome);
        }

        if summary.installed > 0 {
            println!("\n[DEPENDENCIES] Installing plugin dependencies...");
            match self.provisioner.run_host_provisioning_pass() {
                Ok(true) => println!("  [SUCCESS] Host dependency provisioning completed"),
                Ok(false) => {}
                Err(err) => {
                    println!("  [WARNING] Host dependency provisioning had issues: {err}");
                    tracing::warn!("host provisioning pass failed: {err}");
                }
            }
        }

        summary
    }

    fn install_plugin(&self, id: &PluginId, descriptor: &PluginDescriptor) -> InstallOutcome {
        println!("\n[PLUGIN] Installing plugin: {}", descriptor.display_name(id));

        if !policy::eligible(descriptor, &self.profile) {
            println!(
                "  [SKIP] Skipping {id} (disabled or not required for {})",
                self.environment
            );
            return InstallOutcome::Skipped;
        }

        match self.try_install(id, descriptor) {
            Ok(()) => {
                println!("  [SUCCESS] Plugin {id} installed successfully");
                InstallOutcome::Installed
            }
            Err(err) => {
                println!("  [ERROR] Failed to install {id}: {err}");
                tracing::warn!(plugin = %id, "install failed: {err}");
                InstallOutcome::Failed(err)
            }
        }
    }

    fn try_install(&self, id: &PluginId, descriptor: &PluginDescriptor) -> Result<(), InstallError> {
        if let Some(reason) = descriptor.missing_install_info() {
            return Err(InstallError::Invalid(reason));
        }
        let Some(target) = self.target_path(descriptor) else {
            return Err(InstallError::Invalid("missing install_path".to_string()));
        };

        let branch = policy::branch_for(descriptor, &self.profile);
        let source = self
            .fetcher
            .fetch(&descriptor.repository.url, branch, &target)?;
        tracing::info!(plugin = %id, %branch, ?source, "fetched into {}", target.display());

        // Dependency failures are recoverable by a later provisioning pass.
        if let Err(err) = self.provisioner.install_declared(descriptor) {
            println!("  [WARNING] Some dependencies failed to install: {err}");
        }

        if !target.exists() {
            return Err(InstallError::Verification(target));
        }

        Ok(())
    }

    pub fn list(&self) -> Vec<PluginListing<'_>> {
        self.registry
            .plugins
            .iter()
            .map(|(id, descriptor)| PluginListing {
                id,
                descriptor,
                enabled: descriptor.enabled,
                required: descriptor.required,
                installed: self
                    .target_path(descriptor)
                    .is_some_and(|path| path.exists()),
            })
            .collect()
    }

    pub fn clean(&self) -> CleanSummary {
        println!("[CLEANUP] Cleaning installed plugins...");
        let mut summary = CleanSummary::default();

        for (id, descriptor) in &self.registry.plugins {
            let Some(target) = self.target_path(descriptor) else {
                if descriptor.install_path.is_some() {
                    tracing::warn!(plugin = %id, "install_path outside project root, not cleaning");
                }
                continue;
            };
            if !target.exists() {
                continue;
            }

            match remove_path(&target) {
                Ok(()) => {
                    println!("  [REMOVED] {id}");
                    tracing::info!(plugin = %id, "removed {}", target.display());
                    summary.removed += 1;
                }
                Err(err) => {
                    println!("  [ERROR] Failed to remove {id}: {err}");
                    tracing::warn!(plugin = %id, "failed to remove {}: {err}", target.display());
                    summary.failed += 1;
                }
            }
        }

        println!("[CLEANUP] Cleaned {} plugins", summary.removed);
        summary
    }

    fn target_path(&self, descriptor: &PluginDescriptor) -> Option<PathBuf> {
        descriptor
            .contained_install_path()
            .map(|path| self.root.join(path))
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "panic with non-string payload".to_string()
}
