// load_config.rs
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use geometry::{Geometry, Organization, preset_names};
use pipeline::{AttentionShape, PipelineParams};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct GeneratorConfig {
    #[serde(rename = "GEOMETRY", default)]
    pub geometry: GeometrySection,
    #[serde(rename = "MODEL", default)]
    pub model: AttentionShape,
    #[serde(rename = "PIPELINE", default)]
    pub pipeline: PipelineParams,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GeometrySection {
    pub preset: String,
    pub channels: u64,
    /// Overrides the preset's column granularity.
    pub granularity: Option<u64>,
}

impl Default for GeometrySection {
    fn default() -> Self {
        GeometrySection {
            preset: "HBM3_8Gb_2R".to_string(),
            channels: 16,
            granularity: None,
        }
    }
}

impl GeometrySection {
    pub fn build(&self) -> Result<Geometry> {
        let mut org = Organization::hbm3_preset(&self.preset, self.channels).with_context(|| {
            let known: Vec<_> = preset_names().collect();
            format!("known presets: {}", known.join(", "))
        })?;
        if let Some(granularity) = self.granularity {
            org.granularity = granularity;
        }
        Geometry::new(org).with_context(|| format!("invalid {} organization", self.preset))
    }
}

pub fn load_config_from_file(path: &Path) -> Result<GeneratorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: GeneratorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}
