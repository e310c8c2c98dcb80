use std::collections::HashMap;
use std::fmt;

use crate::key::StreamKey;

/// Upstream address handed to the transcoder as its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator(String);

impl SourceLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves stream keys to upstream sources.
///
/// A `None` answer means the key is well-formed but nothing is configured
/// for it; the supervisor reports that as not found without touching the
/// registry.
pub trait SourceRegistry: Send + Sync + fmt::Debug {
    fn resolve(&self, key: &StreamKey) -> Option<SourceLocator>;
}

/// Explicit key table with an optional `{key}` URL template fallback.
#[derive(Debug, Clone, Default)]
pub struct StaticSources {
    streams: HashMap<String, String>,
    template: Option<String>,
}

impl StaticSources {
    pub fn new(
        streams: HashMap<String, String>,
        template: Option<String>,
    ) -> Self {
        Self { streams, template }
    }

    pub fn with_stream(
        mut self,
        key: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        self.streams.insert(key.into(), url.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

impl SourceRegistry for StaticSources {
    fn resolve(&self, key: &StreamKey) -> Option<SourceLocator> {
        if let Some(url) = self.streams.get(key.as_str()) {
            return Some(SourceLocator::new(url.clone()));
        }

        self.template
            .as_ref()
            .map(|template| template.replace("{key}", key.as_str()))
            .map(SourceLocator::new)
    }
}
