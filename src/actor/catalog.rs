// actor/catalog.rs - Agent Class Catalog

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::actor::behaviour::{Agent, InitArgs};
use crate::error::AgentError;

/// Deployable agent class: a module plus a class name inside it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentClass {
    pub module: String,
    pub class_name: String,
}

impl AgentClass {
    pub fn new(module: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            class_name: class_name.into(),
        }
    }
}

impl fmt::Display for AgentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.class_name)
    }
}

/// Builds a fresh behaviour from init args
pub type AgentFactory = Arc<dyn Fn(&InitArgs) -> anyhow::Result<Box<dyn Agent>> + Send + Sync>;

/// Registry of agent classes a node can instantiate
#[derive(Default)]
pub struct AgentCatalog {
    factories: DashMap<AgentClass, AgentFactory>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the built-in behaviours
    pub fn with_builtins() -> Self {
        let catalog = Self::new();
        crate::actor::builtin::register_builtins(&catalog);
        catalog
    }

    /// Register (or replace) a class
    pub fn register<F>(&self, module: impl Into<String>, class_name: impl Into<String>, factory: F)
    where
        F: Fn(&InitArgs) -> anyhow::Result<Box<dyn Agent>> + Send + Sync + 'static,
    {
        let class = AgentClass::new(module, class_name);
        debug!("Registering agent class {}", class);
        self.factories.insert(class, Arc::new(factory));
    }

    pub fn contains(&self, module: &str, class_name: &str) -> bool {
        self.factories
            .contains_key(&AgentClass::new(module, class_name))
    }

    /// Instantiate a behaviour
    pub fn create(
        &self,
        module: &str,
        class_name: &str,
        args: &InitArgs,
    ) -> Result<Box<dyn Agent>, AgentError> {
        let factory = self
            .factories
            .get(&AgentClass::new(module, class_name))
            .map(|f| f.value().clone())
            .ok_or_else(|| AgentError::UnknownAgentClass {
                module: module.to_string(),
                class_name: class_name.to_string(),
            })?;

        factory(args).map_err(|e| AgentError::InitFailed(format!("{module}/{class_name}: {e:#}")))
    }

    /// All registered classes, sorted
    pub fn classes(&self) -> Vec<AgentClass> {
        let mut classes: Vec<AgentClass> = self.factories.iter().map(|e| e.key().clone()).collect();
        classes.sort();
        classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl_message::AclMessage;
    use crate::actor::AgentContext;

    struct Quiet;

    impl Agent for Quiet {
        fn on_message(&mut self, _ctx: &AgentContext, _msg: AclMessage) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unknown_class() {
        let catalog = AgentCatalog::new();
        let err = catalog.create("demo", "Missing", &InitArgs::new()).err().unwrap();
        assert!(matches!(err, AgentError::UnknownAgentClass { .. }));
    }

    #[test]
    fn test_factory_receives_args() {
        let catalog = AgentCatalog::new();
        catalog.register("demo", "Quiet", |args: &InitArgs| {
            anyhow::ensure!(args.contains_key("mode"), "mode is required");
            Ok(Box::new(Quiet) as Box<dyn Agent>)
        });

        assert!(catalog.contains("demo", "Quiet"));
        assert!(matches!(
            catalog.create("demo", "Quiet", &InitArgs::new()),
            Err(AgentError::InitFailed(_))
        ));

        let mut args = InitArgs::new();
        args.insert("mode".into(), "fast".into());
        assert!(catalog.create("demo", "Quiet", &args).is_ok());
    }

    #[test]
    fn test_builtins_listed() {
        let catalog = AgentCatalog::with_builtins();
        let classes = catalog.classes();
        assert!(classes.contains(&AgentClass::new("builtin", "Echo")));
        assert!(classes.contains(&AgentClass::new("builtin", "Log")));
    }
}
