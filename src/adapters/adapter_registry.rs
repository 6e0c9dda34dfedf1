use crate::adapters::{DryRunAdapter, PlatformAdapter};
use crate::errors::Error;
use tracing::debug;

/// Platform adapters available to a worker, looked up by platform id
#[derive(Debug)]
pub struct AdapterRegistry {
    pub adapters: Vec<Box<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Box<dyn PlatformAdapter>>) -> Self {
        debug!(
            "Loaded adapters: {:?}",
            adapters.iter().map(|a| a.name()).collect::<Vec<_>>()
        );
        AdapterRegistry { adapters }
    }

    /// Registry containing every adapter compiled into the binary
    pub fn with_builtin_adapters() -> Self {
        Self::new(vec![Box::new(DryRunAdapter::default()) as Box<dyn PlatformAdapter>])
    }

    pub fn get_adapter(&self, platform: &str) -> Result<&dyn PlatformAdapter, Error> {
        self.adapters
            .iter()
            .find(|adapter| adapter.name() == platform)
            .map(|adapter| &**adapter)
            .ok_or_else(|| Error::UnknownPlatform(platform.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_platform_id() {
        let registry = AdapterRegistry::with_builtin_adapters();
        assert_eq!(registry.get_adapter("dry-run").unwrap().name(), "dry-run");
        assert!(matches!(
            registry.get_adapter("linkedin"),
            Err(Error::UnknownPlatform(name)) if name == "linkedin"
        ));
    }
}
