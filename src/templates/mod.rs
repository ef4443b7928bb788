use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::Templates;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([^{}]*)\}").expect("placeholder pattern is valid")
});

/// Email template with `${name}` placeholders.
///
/// The text is never modified; every [`Template::render`] starts over from
/// the unmodified text.
#[derive(Debug, Clone)]
pub struct Template {
    text: Arc<str>,
}

impl Template {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Arc::from(text.into()),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read template {}: {}", path.display(), e))?;
        Ok(Self::new(text))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn render(&self) -> Render<'_> {
        Render {
            template: self,
            bindings: HashMap::new(),
        }
    }
}

/// Bindings collected for one render.
#[derive(Debug)]
pub struct Render<'a> {
    template: &'a Template,
    bindings: HashMap<String, String>,
}

impl<'a> Render<'a> {
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(key.into(), value.into());
        self
    }

    pub fn build(&self) -> String {
        // Single pass: bound values are emitted as-is and never re-expanded.
        PLACEHOLDER
            .replace_all(self.template.as_str(), |caps: &Captures| {
                match self.bindings.get(&caps[1]) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct EmailTemplates {
    pub normal: Template,
    pub fallback: Template,
}

impl EmailTemplates {
    pub fn load(paths: &Templates) -> Result<Self, anyhow::Error> {
        let normal = Template::from_file(&paths.normal)?;
        let fallback = Template::from_file(&paths.fallback)?;

        tracing::info!(
            normal = %paths.normal.display(),
            fallback = %paths.fallback.display(),
            "Email templates loaded"
        );

        Ok(Self { normal, fallback })
    }
}
