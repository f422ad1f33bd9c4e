use crate::plugin::error::InstallError;
use crate::plugin::manifest::PluginId;

/// Terminal state of one plugin in an install run.
#[derive(Debug)]
pub enum InstallOutcome {
    Skipped,
    Installed,
    Failed(InstallError),
}

impl InstallOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            InstallOutcome::Skipped => "skipped",
            InstallOutcome::Installed => "installed",
            InstallOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Default)]
pub struct InstallSummary {
    pub outcomes: Vec<(PluginId, InstallOutcome)>,
    pub installed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl InstallSummary {
    pub fn record(&mut self, id: PluginId, outcome: InstallOutcome) {
        match &outcome {
            InstallOutcome::Skipped => self.skipped += 1,
            InstallOutcome::Installed => self.installed += 1,
            InstallOutcome::Failed(_) => self.failed += 1,
        }
        self.outcomes.push((id, outcome));
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PluginId, &InstallError)> {
        self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
            InstallOutcome::Failed(err) => Some((id, err)),
            _ => None,
        })
    }

    #[cfg(test)]
    pub fn outcome(&self, id: &str) -> Option<&InstallOutcome> {
        self.outcomes
            .iter()
            .find(|(key, _)| key.0 == id)
            .map(|(_, outcome)| outcome)
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanSummary {
    pub removed: usize,
    pub failed: usize,
}

impl CleanSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_failed_plugin_fails_the_install_run() {
        let mut summary = InstallSummary::default();
        summary.record(PluginId("a".to_string()), InstallOutcome::Installed);
        summary.record(PluginId("b".to_string()), InstallOutcome::Skipped);
        assert!(summary.is_success());

        summary.record(
            PluginId("c".to_string()),
            InstallOutcome::Failed(InstallError::Invalid("missing install_path".to_string())),
        );
        assert!(!summary.is_success());
        assert_eq!((summary.installed, summary.skipped, summary.failed), (1, 1, 1));
        assert_eq!(summary.failures().count(), 1);
    }

    #[test]
    fn any_failed_removal_fails_the_clean_run() {
        assert!(CleanSummary { removed: 0, failed: 0 }.is_success());
        assert!(CleanSummary { removed: 3, failed: 0 }.is_success());
        assert!(!CleanSummary { removed: 2, failed: 1 }.is_success());
    }
}
