//! Dependency provisioning: per-plugin package installs and the host-level
//! reconciliation pass that runs once after a batch.

use std::path::PathBuf;

use crate::model::config::ProvisioningSettings;
use crate::plugin::error::DependencyError;
use crate::plugin::manifest::PluginDescriptor;
use crate::plugin::process::{CommandRunner, Invocation, SystemRunner};

pub struct DependencyProvisioner {
    root: PathBuf,
    settings: ProvisioningSettings,
    runner: Box<dyn CommandRunner>,
}

impl DependencyProvisioner {
    pub fn new(root: PathBuf, settings: ProvisioningSettings) -> Self {
        Self::with_runner(root, settings, Box::new(SystemRunner))
    }

    pub fn with_runner(
        root: PathBuf,
        settings: ProvisioningSettings,
        runner: Box<dyn CommandRunner>,
    ) -> Self {
        Self {
            root,
            settings,
            runner,
        }
    }

    /// Install every declared dependency, one package-manager call per
    /// ecosystem. All ecosystems are attempted; the first failure is returned.
    pub fn install_declared(&self, descriptor: &PluginDescriptor) -> Result<(), DependencyError> {
        if !descriptor.has_dependencies() {
            return Ok(());
        }

        let mut first_error = None;
        for (ecosystem, packages) in &descriptor.dependencies {
            if packages.is_empty() {
                continue;
            }

            println!(
                "  [DEPENDENCIES] Installing {ecosystem} dependencies: {}",
                packages.join(", ")
            );
            if let Err(err) = self.install_ecosystem(ecosystem, packages) {
                tracing::warn!(%ecosystem, "dependency install failed: {err}");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn install_ecosystem(&self, ecosystem: &str, packages: &[String]) -> Result<(), DependencyError> {
        let Some((program, prefix)) = self
            .settings
            .package_managers
            .get(ecosystem)
            .and_then(|command| command.split_first())
        else {
            return Err(DependencyError::UnknownEcosystem(ecosystem.to_string()));
        };

        let invocation = Invocation::new(program.as_str(), self.settings.timeout())
            .args(prefix.iter().cloned())
            .args(packages.iter().cloned())
            .cwd(&self.root);
        let output = self.runner.run(&invocation)?;

        if output.success {
            tracing::info!(%ecosystem, count = packages.len(), "dependencies installed");
            Ok(())
        } else {
            Err(DependencyError::Failed {
                ecosystem: ecosystem.to_string(),
                status: output.status,
                stderr: output.stderr,
            })
        }
    }

    /// Run the host dependency script once. `Ok(false)` when the script is
    /// absent, which is not an error.
    pub fn run_host_provisioning_pass(&self) -> Result<bool, DependencyError> {
        let script = self.root.join(&self.settings.host_script);
        if !script.is_file() {
            println!(
                "  [SKIP] {} not found, skipping host dependency provisioning",
                script.display()
            );
            tracing::info!("host provisioning script {} absent", script.display());
            return Ok(false);
        }

        // The script expects to run from its own directory.
        let workdir = script
            .parent()
            .map_or_else(|| self.root.clone(), PathBuf::from);
        let file_name = script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        println!("  [PROVISION] Running {}", script.display());
        let invocation = Invocation::new(self.settings.interpreter.as_str(), self.settings.timeout())
            .args([file_name])
            .cwd(workdir);
        let output = self.runner.run(&invocation)?;

        if output.success {
            tracing::info!("host provisioning pass completed");
            Ok(true)
        } else {
            Err(DependencyError::HostPassFailed {
                script,
                status: output.status,
                stderr: output.stderr,
            })
        }
    }
}
