use indexmap::IndexMap;

pub const VISION_CAPABILITY: &str = "vision";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

// name, provider, capabilities, context window
const BUILTIN_MODELS: &[(&str, &str, &[&str], u64)] = &[
    ("gpt-4o", "openai", &["text", VISION_CAPABILITY], 128_000),
    ("gpt-4o-mini", "openai", &["text", VISION_CAPABILITY], 128_000),
    ("gpt-4.1", "openai", &["text", VISION_CAPABILITY], 1_047_576),
    ("gpt-4.1-mini", "openai", &["text", VISION_CAPABILITY], 1_047_576),
    ("gpt-3.5-turbo", "openai", &["text"], 16_385),
    ("dryrun-vision-1", "dryrun", &["text", VISION_CAPABILITY], 8_192),
];

impl ModelRegistry {
    /// `None` loads the built-in table, whose first vision entry is the default.
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        let models = models.unwrap_or_else(|| {
            BUILTIN_MODELS
                .iter()
                .map(|(name, provider, capabilities, window)| {
                    let spec = ModelSpec {
                        name: (*name).to_string(),
                        provider: (*provider).to_string(),
                        capabilities: capabilities.iter().map(|cap| (*cap).to_string()).collect(),
                        context_window: Some(*window),
                    };
                    (spec.name.clone(), spec)
                })
                .collect()
        });
        Self { models }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}
