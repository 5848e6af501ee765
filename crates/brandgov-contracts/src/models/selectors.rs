use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    /// Set when no id was requested and the registry default was used.
    pub defaulted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    /// Resolves a model for `capability`. An unknown or unsuitable request is
    /// an error rather than a silent swap to another model; only an absent
    /// request falls back to the registry default.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let Some(name) = requested else {
            return self
                .registry
                .first_for(capability)
                .map(|model| ModelSelection {
                    model: model.clone(),
                    defaulted: true,
                })
                .ok_or_else(|| {
                    format!("No models available for capability '{}'.", capability.as_str())
                });
        };

        match self.registry.get(name) {
            Some(model) if model.capability == capability => Ok(ModelSelection {
                model: model.clone(),
                defaulted: false,
            }),
            Some(model) => Err(format!(
                "Model '{name}' serves '{}', not '{}'.",
                model.capability.as_str(),
                capability.as_str()
            )),
            None => Err(format!(
                "Model '{name}' is not registered for capability '{}'.",
                capability.as_str()
            )),
        }
    }
}
