pub mod estimator;
mod farneback;
pub mod planner;
pub mod synth;

pub use estimator::{FlowPair, OpticalFlowEstimator};
pub use planner::TimeStepPlanner;
pub use synth::FrameSynthesizer;

use crate::device::capability::{self, CapabilityRequirement};
use crate::device::{DeviceRegistry, DeviceSession};
use crate::error::MotionError;
use crate::frame::PixelBuffer;

/// Both frames must share dimensions, channel count and sample format.
pub(crate) fn check_pair(a: &PixelBuffer, b: &PixelBuffer) -> Result<(), MotionError> {
    if !a.same_dimensions(b) {
        return Err(MotionError::DimensionMismatch {
            first_width: a.width(),
            first_height: a.height(),
            second_width: b.width(),
            second_height: b.height(),
        });
    }
    if a.channels() != b.channels() || a.format() != b.format() {
        return Err(MotionError::LayoutMismatch(format!(
            "{} channel(s) {:?} vs {} channel(s) {:?}",
            a.channels(),
            a.format(),
            b.channels(),
            b.format()
        )));
    }
    Ok(())
}

/// The bound session, provided it still satisfies `requirement`.
pub(crate) fn admitted_session<'r>(
    registry: &'r DeviceRegistry,
    requirement: &CapabilityRequirement,
) -> Result<&'r DeviceSession, MotionError> {
    let session = registry.session().ok_or(MotionError::NoCompatibleDevice {
        device: None,
        unmet: Vec::new(),
    })?;
    let unmet = capability::evaluate(session.descriptor(), requirement);
    if !unmet.is_empty() {
        return Err(MotionError::NoCompatibleDevice {
            device: Some(session.descriptor().device_name.clone()),
            unmet,
        });
    }
    Ok(session)
}
