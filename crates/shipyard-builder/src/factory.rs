//! Framework tag to builder dispatch.

use shipyard_config::NodeJsConfig;
use shipyard_core::{Builder, BuilderFactory, BuilderOptions, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::ContainerEngine;
use crate::nodejs::NodeJsBuilder;

/// Builder families a framework tag can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderFamily {
    NodeJs,
}

/// Creates builders by framework tag. Tags are case-sensitive.
pub struct FrameworkBuilderFactory {
    nodejs: NodeJsConfig,
    engine: Arc<dyn ContainerEngine>,
    families: HashMap<&'static str, BuilderFamily>,
}

impl FrameworkBuilderFactory {
    pub fn new(nodejs: NodeJsConfig, engine: Arc<dyn ContainerEngine>) -> Self {
        let families = ["react", "vue", "svelte", "angular"]
            .into_iter()
            .map(|tag| (tag, BuilderFamily::NodeJs))
            .collect();

        Self {
            nodejs,
            engine,
            families,
        }
    }

    pub fn supported_frameworks(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.families.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    fn family(&self, framework: &str) -> Option<BuilderFamily> {
        self.families.get(framework).copied()
    }
}

impl BuilderFactory for FrameworkBuilderFactory {
    fn create_builder(&self, framework: &str, options: BuilderOptions) -> Result<Box<dyn Builder>> {
        match self.family(framework) {
            Some(BuilderFamily::NodeJs) => Ok(Box::new(NodeJsBuilder::new(
                self.nodejs.clone(),
                options,
                self.engine.clone(),
            ))),
            None => Err(Error::InvalidInput(format!(
                "unsupported framework: {} (supported: {})",
                framework,
                self.supported_frameworks().join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodejs::tests::FakeEngine;

    fn factory() -> FrameworkBuilderFactory {
        FrameworkBuilderFactory::new(NodeJsConfig::default(), Arc::new(FakeEngine::default()))
    }

    #[test]
    fn test_nodejs_family_tags() {
        let factory = factory();
        for tag in ["react", "vue", "svelte", "angular"] {
            let builder = factory
                .create_builder(tag, BuilderOptions::default())
                .unwrap();
            assert_eq!(builder.name(), "nodejs");
        }
        assert_eq!(
            factory.supported_frameworks(),
            vec!["angular", "react", "svelte", "vue"]
        );
    }

    #[test]
    fn test_unsupported_framework() {
        let err = factory()
            .create_builder("elm", BuilderOptions::default())
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "invalid input: unsupported framework: elm (supported: angular, react, svelte, vue)"
        );
    }

    #[test]
    fn test_tags_are_case_sensitive() {
        assert!(factory().family("React").is_none());
    }
}
