//! Motion-compensated frame interpolation.
//!
//! Two frames go in, `n` evenly spaced intermediate frames come out. Motion
//! between the frames is estimated as dense optical flow in both
//! directions, then each intermediate frame is blended from both sources
//! along that motion. All device work runs on one bound execution device
//! that must pass a capability gate first.
//!
//! ```no_run
//! use flowtween::{DeviceRegistry, FlowParams, InterpolationPipeline};
//! use flowtween::frame::io::load_frame;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let a = load_frame(Path::new("a.png"))?;
//! let b = load_frame(Path::new("b.png"))?;
//! let mut pipeline = InterpolationPipeline::new(DeviceRegistry::host(), FlowParams::default())?;
//! let frames = pipeline.interpolate(&a, &b, 3)?;
//! assert_eq!(frames.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod motion;
pub mod pipeline;

pub use config::{FlowFlags, FlowParams, Settings};
pub use device::{CapabilityRequirement, DeviceDescriptor, DeviceRegistry};
pub use error::{ConfigError, DeviceError, FrameError, MotionError, PipelineError};
pub use frame::{FlowField, PixelBuffer, SampleFormat};
pub use motion::{FlowPair, FrameSynthesizer, OpticalFlowEstimator, TimeStepPlanner};
pub use pipeline::{InterpolationPipeline, PairInterpolation, PipelineState};
