use crate::model::vo::{AppSpec, ProcessorSpec};

/// An app loaded into the registry, identified by the URI it was loaded from.
#[derive(Clone, Debug, PartialEq)]
pub struct App {
    pub spec_uri: String,
    pub spec: AppSpec,
}

impl App {
    pub fn new(spec_uri: impl Into<String>, spec: AppSpec) -> Self {
        Self {
            spec_uri: spec_uri.into(),
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn processor(&self, name: &str) -> Option<&ProcessorSpec> {
        self.spec.processors.iter().find(|p| p.name == name)
    }

    pub fn image(&self) -> Option<&str> {
        self.spec.app_image.as_deref().filter(|image| !image.is_empty())
    }
}
