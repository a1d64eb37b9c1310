use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

bitflags! {
    /// Estimator behaviour switches, written in JSON as flag names joined
    /// by `|` (`"USE_INITIAL_FLOW | GAUSSIAN_WINDOW"`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FlowFlags: u32 {
        /// Start from the supplied flow instead of zeros.
        const USE_INITIAL_FLOW = 4;
        /// Gaussian instead of box averaging of the flow matrices.
        const GAUSSIAN_WINDOW = 256;
    }
}

impl Default for FlowFlags {
    fn default() -> Self {
        FlowFlags::empty()
    }
}

/// Dense pyramidal flow parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct FlowParams {
    pub pyramid_scale: f64,
    pub levels: usize,
    pub window_size: usize,
    pub iterations: usize,
    pub poly_expansion_neighborhood: usize,
    pub poly_expansion_sigma: f64,
    pub use_fast_pyramids: bool,
    pub flags: FlowFlags,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            pyramid_scale: 0.5,
            levels: 3,
            window_size: 25,
            iterations: 3,
            poly_expansion_neighborhood: 5,
            poly_expansion_sigma: 1.1,
            use_fast_pyramids: false,
            flags: FlowFlags::empty(),
        }
    }
}

impl FlowParams {
    /// Flags for one run: `USE_INITIAL_FLOW` only survives when a seed is
    /// actually supplied.
    pub fn effective_flags(&self, has_seed: bool) -> FlowFlags {
        let mut flags = self.flags;
        if !has_seed {
            flags.remove(FlowFlags::USE_INITIAL_FLOW);
        }
        flags
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.pyramid_scale > 0.0 && self.pyramid_scale < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "pyramidScale must be in (0, 1), got {}",
                self.pyramid_scale
            )));
        }
        if self.window_size < 1 {
            return Err(ConfigError::Invalid("windowSize must be at least 1".into()));
        }
        if self.iterations < 1 {
            return Err(ConfigError::Invalid("iterations must be at least 1".into()));
        }
        if !matches!(self.poly_expansion_neighborhood, 5 | 7) {
            return Err(ConfigError::Invalid(format!(
                "polyExpansionNeighborhood must be 5 or 7, got {}",
                self.poly_expansion_neighborhood
            )));
        }
        if !(self.poly_expansion_sigma > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "polyExpansionSigma must be positive, got {}",
                self.poly_expansion_sigma
            )));
        }
        if self.use_fast_pyramids && self.pyramid_scale != 0.5 {
            return Err(ConfigError::Invalid(
                "useFastPyramids requires pyramidScale 0.5".into(),
            ));
        }
        Ok(())
    }
}

/// Everything the command line can read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Settings {
    pub flow: FlowParams,
    /// Device index to bind; `None` picks the first compatible one.
    pub device: Option<usize>,
    pub kernel_cache: Option<PathBuf>,
    pub threads: Option<usize>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.flow.validate()?;
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        Ok(())
    }

    /// Configured cache directory, or the per-user default.
    pub fn kernel_cache_or_default(&self) -> Option<PathBuf> {
        self.kernel_cache.clone().or_else(default_kernel_cache)
    }
}

/// `<cache dir>/flowtween/kernels`, when the platform has a cache dir.
pub fn default_kernel_cache() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("flowtween").join("kernels"))
}
