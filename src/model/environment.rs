use clap::ValueEnum;

/// Runtime environments a registry can carry a profile for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Environment {
    /// Local checkout, dev plugins and dev branches usually allowed.
    Development,
    /// Shipped installs.
    #[default]
    Production,
    /// Build pipelines, typically only required plugins.
    Ci,
}

impl Environment {
    /// Key used for this environment in the `environments` table.
    pub fn label(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Ci => "ci",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
