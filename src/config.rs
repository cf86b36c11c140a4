use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Tuning knobs for the whole engine. Every field has a default, so a TOML
/// file only needs to mention what it overrides.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct VizConfig {
    pub partition: PartitionConfig,
    pub packing: PackingConfig,
    pub render: RenderConfig,
    pub navigation: NavigationConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PartitionConfig {
    /// Levels partitioned below the current view root.
    pub preview_depth: u8,
    pub max_iterations: usize,
    /// Early-stop threshold: worst cell area error as a fraction of the clip area.
    pub convergence_tolerance: f32,
    /// Results with a worse error than this are replaced by the fallback layout.
    pub acceptance_tolerance: f32,
    /// Results where any cell misses its own target area by more than this
    /// fraction are replaced by the fallback layout too.
    pub cell_tolerance: f32,
    /// Inset applied to the viewport before partitioning.
    pub viewport_padding: f32,
    /// Levels with more children than this go straight to the fallback layout.
    pub max_power_sites: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            preview_depth: 2,
            max_iterations: 120,
            convergence_tolerance: 0.01,
            acceptance_tolerance: 0.03,
            cell_tolerance: 0.1,
            viewport_padding: 2.0,
            max_power_sites: 150,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PackingConfig {
    /// Upper bound on bubbles per file group.
    pub max_bubbles: usize,
    pub placement_attempts: usize,
    /// Minimum spacing between placed disks, in pixels.
    pub gap: f32,
    /// Ticks run by a fresh relaxation (and again after a drag release).
    pub relax_ticks: usize,
    pub repulsion: f32,
    pub centroid_pull: f32,
    pub damping: f32,
    pub max_speed: f32,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            max_bubbles: 50,
            placement_attempts: 80,
            gap: 2.0,
            relax_ticks: 120,
            repulsion: 40.0,
            centroid_pull: 0.004,
            damping: 0.8,
            max_speed: 6.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Cells smaller than this (px²) get no label.
    pub min_label_area: f32,
    pub min_font_size: f32,
    /// Upper font size as a fraction of the viewport's short side.
    pub max_font_fraction: f32,
    pub background_opacity: f32,
    pub preview_opacity: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            min_label_area: 2500.0,
            min_font_size: 9.0,
            max_font_fraction: 0.035,
            background_opacity: 0.85,
            preview_opacity: 0.35,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct NavigationConfig {
    /// In-flight fetches older than this are failed and the lock released.
    pub fetch_timeout_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 15_000,
        }
    }
}

impl NavigationConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl VizConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: VizConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.partition.preview_depth == 0 {
            return Err(ConfigError::Invalid(
                "partition.preview_depth must be at least 1".to_string(),
            ));
        }
        if self.partition.acceptance_tolerance <= 0.0 || self.partition.cell_tolerance <= 0.0 {
            return Err(ConfigError::Invalid(
                "partition tolerances must be positive".to_string(),
            ));
        }
        if self.partition.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "partition.max_iterations must be positive".to_string(),
            ));
        }
        if !(self.packing.damping > 0.0 && self.packing.damping <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "packing.damping must be in (0, 1], got {}",
                self.packing.damping
            )));
        }
        if self.packing.gap < 0.0 {
            return Err(ConfigError::Invalid("packing.gap must not be negative".to_string()));
        }
        Ok(())
    }
}
