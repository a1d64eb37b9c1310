use serde::Serialize;
use thiserror::Error;

use crate::device::capability::Unmet;

/// Errors raised while building or converting frame data.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error("Unsupported channel count: {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(usize),

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Image I/O failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Failures reported by a device runtime backend.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("platform query failed: {0}")]
    Query(String),

    #[error("device open failed: {0}")]
    Open(String),
}

/// One device that failed the capability gate, with every predicate it missed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub device: String,
    pub unmet: Vec<Unmet>,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} ({})", self.index, self.device, join_unmet(&self.unmet))
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device index {index} out of range ({count} devices enumerated)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("device {index} ({device}) is incompatible: {}", join_unmet(.unmet))]
    IncompatibleDevice {
        index: usize,
        device: String,
        unmet: Vec<Unmet>,
    },

    #[error("device enumeration failed: {0}")]
    DeviceQueryFailed(#[source] RuntimeError),

    #[error("no compatible device among {} enumerated{}", .rejected.len(), join_rejections(.rejected))]
    NoCompatibleDevice { rejected: Vec<Rejection> },

    #[error("could not open device {index}: {source}")]
    BindFailed {
        index: usize,
        #[source]
        source: RuntimeError,
    },
}

/// Errors from flow estimation and frame synthesis.
#[derive(Error, Debug)]
pub enum MotionError {
    #[error("frame dimensions differ: {first_width}x{first_height} vs {second_width}x{second_height}")]
    DimensionMismatch {
        first_width: usize,
        first_height: usize,
        second_width: usize,
        second_height: usize,
    },

    #[error("frame layouts differ: {0}")]
    LayoutMismatch(String),

    #[error("no compatible device bound{}", describe_bound(.device, .unmet))]
    NoCompatibleDevice {
        device: Option<String>,
        unmet: Vec<Unmet>,
    },

    #[error("kernel execution failed in {kernel}: {reason}")]
    KernelExecutionFailed { kernel: &'static str, reason: String },

    #[error("time step {0} outside [0, 1]")]
    InvalidTimeStep(f32),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A failed interpolation run, tagged with the stage that failed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("device selection failed: {0}")]
    DeviceSelection(#[from] DeviceError),

    #[error("invalid frame pair: {0}")]
    InvalidInput(#[source] MotionError),

    #[error("flow estimation failed: {0}")]
    FlowEstimation(#[source] MotionError),

    #[error("synthesis failed at t={t}: {source}")]
    Synthesis {
        t: f32,
        #[source]
        source: MotionError,
    },
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::DeviceSelection(_) => "device selection",
            PipelineError::InvalidInput(_) => "input validation",
            PipelineError::FlowEstimation(_) => "flow estimation",
            PipelineError::Synthesis { .. } => "synthesis",
        }
    }
}

fn join_unmet(unmet: &[Unmet]) -> String {
    unmet
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_rejections(rejected: &[Rejection]) -> String {
    if rejected.is_empty() {
        return String::new();
    }
    let list = rejected
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(": {}", list)
}

fn describe_bound(device: &Option<String>, unmet: &[Unmet]) -> String {
    match device {
        None => " (no device selected)".to_string(),
        Some(name) => format!(" ({} rejected: {})", name, join_unmet(unmet)),
    }
}
