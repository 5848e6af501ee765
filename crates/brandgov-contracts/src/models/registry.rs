use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Extraction and compliance analysis.
    Reasoning,
    /// Image production from prompts and visual context.
    Vision,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Reasoning => "reasoning",
            Capability::Vision => "vision",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capability: Capability,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn new(name: &str, provider: &str, capability: Capability) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            capability,
            context_window: None,
        }
    }

    /// Dryrun models run offline; every other provider is remote.
    pub fn needs_credential(&self) -> bool {
        self.provider != "dryrun"
    }
}

// name, provider, capability, context window. Order sets the per-capability
// default.
const BUILTIN: &[(&str, &str, Capability, Option<u64>)] = &[
    ("gemini-3-pro-preview", "gemini", Capability::Reasoning, Some(1_000_000)),
    ("gemini-2.5-pro", "gemini", Capability::Reasoning, Some(1_000_000)),
    ("gemini-2.5-flash", "gemini", Capability::Reasoning, Some(1_000_000)),
    ("gemini-3-pro-image-preview", "gemini", Capability::Vision, Some(65_536)),
    ("gemini-2.5-flash-image", "gemini", Capability::Vision, Some(32_768)),
    ("dryrun-reasoning-1", "dryrun", Capability::Reasoning, Some(8_192)),
    ("dryrun-vision-1", "dryrun", Capability::Vision, None),
];

/// Known models keyed by id, in insertion order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::from_specs(BUILTIN.iter().map(|(name, provider, capability, context_window)| {
            ModelSpec {
                context_window: *context_window,
                ..ModelSpec::new(name, provider, *capability)
            }
        }))
    }
}

impl ModelRegistry {
    pub fn from_specs(specs: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: specs
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn first_for(&self, capability: Capability) -> Option<&ModelSpec> {
        self.models
            .values()
            .find(|model| model.capability == capability)
    }
}
