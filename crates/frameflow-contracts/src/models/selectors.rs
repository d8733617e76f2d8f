use super::registry::{ModelRegistry, VideoModelSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTaskShape<'a> {
    pub provider: &'a str,
    pub ratio: &'a str,
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: VideoModelSpec,
    pub requested: Option<String>,
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

    pub fn select(
        &self,
        requested: Option<&str>,
        shape: VideoTaskShape<'_>,
    ) -> Result<ModelSelection, String> {
        let VideoTaskShape {
            provider,
            ratio,
            duration,
        } = shape;
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            match self.registry.get(requested_value) {
                Some(model) if model.provider == provider && model.supports(ratio, duration) => {
                    return Ok(ModelSelection {
                        model: model.clone(),
                        requested: Some(requested_value.to_string()),
                        fallback_reason: None,
                    });
                }
                _ => (
                    Some(format!(
                        "Requested model '{requested_value}' unavailable for {provider} {ratio} {duration}s."
                    )),
                    Some(requested_value.to_string()),
                ),
            }
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.compatible(provider, ratio, duration);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No {provider} video model supports ratio {ratio} with duration {duration}s."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}
