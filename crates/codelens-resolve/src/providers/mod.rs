//! External resolver implementations

pub mod subprocess;

use std::path::Path;

use anyhow::Result;
use codelens_core::config::ExternalResolverConfig;

use crate::external::ExternalResolver;

/// Factory function to create the configured external resolver
pub fn create_provider(config: &ExternalResolverConfig, root: &Path) -> Result<Box<dyn ExternalResolver>> {
    if config.command.is_empty() {
        anyhow::bail!("External resolver enabled without a command");
    }
    Ok(Box::new(subprocess::SubprocessResolver::new(&config.command, root)?))
}
