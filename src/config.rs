//! Engine configuration, loadable from JSON.
//!
//! Every section defaults independently, so a file only needs the keys it
//! changes:
//!
//! ```json
//! {
//!   "field": { "model": "smooth_union", "blend": 0.2 },
//!   "render": { "palette": "ocean" }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::field::FieldConfig;
use crate::interaction::InteractionConfig;
use crate::layout::LayoutConfig;
use crate::render::RenderConfig;
use crate::tree::TreeConfig;

/// All tunables of an [`Engine`](crate::Engine).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tree: TreeConfig,
    pub layout: LayoutConfig,
    pub field: FieldConfig,
    pub render: RenderConfig,
    pub interaction: InteractionConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(mut self, tree: TreeConfig) -> Self {
        self.tree = tree;
        self
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_field(mut self, field: FieldConfig) -> Self {
        self.field = field;
        self
    }

    pub fn with_render(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    pub fn with_interaction(mut self, interaction: InteractionConfig) -> Self {
        self.interaction = interaction;
        self
    }

    /// Copy with every section pulled back into its valid range. Hand-edited
    /// files bypass the `with_*` setters, so loading always goes through here.
    pub fn clamped(&self) -> Self {
        Self {
            tree: self.tree.clamped(),
            layout: self.layout.clamped(),
            field: self.field.clamped(),
            render: self.render.clamped(),
            interaction: self.interaction.clamped(),
        }
    }

    /// Save the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Load a configuration from JSON. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Ok(config.clamped())
    }
}
