//! Named thumbnail presets

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::FitMode;
use crate::error::{PressError, Result};

/// Largest edge a preset or custom thumbnail may ask for
pub const MAX_THUMBNAIL_EDGE: u32 = 8000;

/// Target box of a thumbnail preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetSize {
    pub width: u32,
    pub height: u32,

    /// Overrides the request's fit mode for this preset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitMode>,
}

impl PresetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fit: None,
        }
    }

    /// Pin this preset to a fit mode
    pub fn with_fit(mut self, fit: FitMode) -> Self {
        self.fit = Some(fit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0
            || self.height == 0
            || self.width > MAX_THUMBNAIL_EDGE
            || self.height > MAX_THUMBNAIL_EDGE
        {
            return Err(PressError::invalid_parameters(format!(
                "Thumbnail dimensions must be between 1-{MAX_THUMBNAIL_EDGE}, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Lookup table from preset name to target box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetTable {
    presets: BTreeMap<String, PresetSize>,
}

impl Default for PresetTable {
    fn default() -> Self {
        let mut presets = BTreeMap::new();
        presets.insert("thumbnail".to_string(), PresetSize::new(150, 150));
        presets.insert("small".to_string(), PresetSize::new(300, 300));
        presets.insert("medium".to_string(), PresetSize::new(600, 600));
        presets.insert("large".to_string(), PresetSize::new(1200, 1200));
        Self { presets }
    }
}

impl PresetTable {
    /// Table without any presets
    pub fn empty() -> Self {
        Self {
            presets: BTreeMap::new(),
        }
    }

    /// Add or replace a preset
    pub fn insert<S: Into<String>>(&mut self, name: S, size: PresetSize) -> &mut Self {
        self.presets.insert(name.into(), size);
        self
    }

    /// Look up a preset, validating its dimensions
    pub fn resolve(&self, name: &str) -> Result<PresetSize> {
        let size = self.presets.get(name).copied().ok_or_else(|| {
            PressError::invalid_parameters(format!(
                "Unknown thumbnail preset '{name}'. Available presets: {:?}",
                self.names()
            ))
        })?;
        size.validate()?;
        Ok(size)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Merge another table in, other wins on conflicts
    pub fn extend(&mut self, other: PresetTable) {
        self.presets.extend(other.presets);
    }

    /// Check every preset in the table
    pub fn validate(&self) -> Result<()> {
        for (name, size) in &self.presets {
            size.validate()
                .map_err(|e| PressError::config(format!("Invalid preset '{name}': {e}")))?;
        }
        Ok(())
    }
}
