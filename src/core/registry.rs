// src/core/registry.rs

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::config::Config;
use crate::core::errors::ScanError;
use crate::core::models::{Payload, Target};
use crate::core::probes::{
    self, ActiveReconProbe, BreachMonitorProbe, PassiveReconProbe, Probe, SocialPresenceProbe,
};

/// Builds a probe from the shared configuration. Must not perform I/O.
pub type ProbeFactory = Arc<dyn Fn(Arc<Config>) -> Arc<dyn Probe> + Send + Sync>;

/// Reports an inner capability under the configuration key it was resolved from, whatever
/// name its factory gave it. Keys are unique, so envelope ids and deadlines are too.
struct Keyed {
    key: String,
    inner: Arc<dyn Probe>,
}

#[async_trait]
impl Probe for Keyed {
    fn name(&self) -> &str {
        &self.key
    }

    async fn execute(&self, target: &Target) -> Result<Payload, ScanError> {
        self.inner.execute(target).await
    }
}

/// Maps configuration names to probe factories.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    factories: IndexMap<String, ProbeFactory>,
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("probes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every probe this crate ships.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(probes::passive::NAME, |config| Arc::new(PassiveReconProbe::new(config)));
        registry.register(probes::active::NAME, |config| Arc::new(ActiveReconProbe::new(config)));
        registry.register(probes::social::NAME, |config| Arc::new(SocialPresenceProbe::new(config)));
        registry.register(probes::breach::NAME, |config| Arc::new(BreachMonitorProbe::new(config)));
        registry
    }

    /// Adds a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Arc<Config>) -> Arc<dyn Probe> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(probe = %name, "Registering probe.");
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiates the enabled probes of `config.modules`, in declaration order.
    ///
    /// Every declared name must be registered, enabled or not, so a typo in the
    /// configuration is reported even for a disabled entry. Each probe answers to its
    /// configuration key, which is also the key of its `probes.<key>` options.
    pub fn resolve(&self, config: &Arc<Config>) -> Result<Vec<Arc<dyn Probe>>, ScanError> {
        if let Some(unknown) = config.modules.keys().find(|name| !self.contains(name)) {
            return Err(ScanError::Configuration(format!("unknown probe `{}` in modules", unknown)));
        }

        let probes: Vec<Arc<dyn Probe>> = config
            .modules
            .iter()
            .filter(|(_, enabled)| **enabled)
            .filter_map(|(key, _)| self.factories.get(key).map(|factory| (key, factory)))
            .map(|(key, factory)| {
                let probe = factory(Arc::clone(config));
                if probe.name() == key {
                    return probe;
                }
                debug!(key = %key, name = %probe.name(), "Probe renamed to its configuration key.");
                Arc::new(Keyed { key: key.clone(), inner: probe }) as Arc<dyn Probe>
            })
            .collect();

        info!(
            enabled = probes.len(),
            declared = config.modules.len(),
            "Probes resolved from configuration."
        );
        Ok(probes)
    }
}
