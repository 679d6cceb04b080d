use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use canvas::{ContextOptions, TextureOptions, UniformValue};
use serde::Deserialize;

/// Contents of `config.toml`. Every field is optional; command-line flags
/// win over anything set here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub fps: Option<f32>,
    pub paused: bool,
    pub watch: Option<bool>,
    pub window: WindowSection,
    pub context: ContextOptions,
    pub uniforms: BTreeMap<String, UniformValue>,
    pub textures: BTreeMap<String, TextureEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSection {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub title: Option<String>,
}

/// `name = "path"` or a table with `source` plus texture options.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextureEntry {
    Reference(String),
    Detailed {
        source: String,
        #[serde(flatten)]
        options: TextureOptions,
    },
}

impl TextureEntry {
    pub fn source(&self) -> &str {
        match self {
            TextureEntry::Reference(source) | TextureEntry::Detailed { source, .. } => source,
        }
    }

    pub fn options(&self) -> TextureOptions {
        match self {
            TextureEntry::Reference(_) => TextureOptions::default(),
            TextureEntry::Detailed { options, .. } => options.clone(),
        }
    }
}

impl FileConfig {
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse shaderpad config")
    }

    /// Loads `path`. A missing file yields the defaults unless `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !required && !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("invalid config at {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }
}
