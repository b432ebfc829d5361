use super::registry::{ModelRegistry, ModelSpec, VISION_CAPABILITY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    /// Why `model` differs from what was asked for, if it does.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select_vision(&self, requested: Option<&str>) -> Result<ModelSelection, String> {
        self.select(requested, VISION_CAPABILITY)
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        if let Some(model) = requested.and_then(|name| self.registry.ensure(name, capability)) {
            return Ok(ModelSelection {
                model,
                requested: requested.map(str::to_string),
                fallback_reason: None,
            });
        }

        let fallback_reason = match requested {
            Some(name) => {
                format!("Requested model '{name}' unavailable for capability '{capability}'.")
            }
            None => "No model specified; using default.".to_string(),
        };
        let model = self
            .registry
            .by_capability(capability)
            .into_iter()
            .next()
            .ok_or_else(|| format!("No models available for capability '{capability}'."))?;
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}
