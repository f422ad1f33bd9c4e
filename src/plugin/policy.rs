//! Environment policy: which plugins a profile admits and which branch they
//! are fetched from. Pure functions over descriptor and profile flags.

use crate::model::config::EnvironmentProfile;
use crate::plugin::manifest::PluginDescriptor;

pub fn eligible(descriptor: &PluginDescriptor, profile: &EnvironmentProfile) -> bool {
    if !descriptor.enabled {
        return false;
    }

    if profile.skip_optional && !descriptor.required {
        return false;
    }

    if !profile.include_dev_plugins && descriptor.dev_only {
        return false;
    }

    true
}

pub fn branch_for<'a>(descriptor: &'a PluginDescriptor, profile: &EnvironmentProfile) -> &'a str {
    if profile.use_dev_branches {
        if let Some(dev_branch) = descriptor.repository.dev_branch.as_deref() {
            return dev_branch;
        }
    }

    descriptor.repository.default_branch()
}
