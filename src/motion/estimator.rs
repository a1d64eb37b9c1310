use std::time::Instant;

use tracing::{debug, warn};

use super::farneback;
use super::{admitted_session, check_pair};
use crate::config::{FlowFlags, FlowParams};
use crate::device::capability::{CapabilityRequirement, KernelFamily};
use crate::device::{DeviceRegistry, Executor, HostExecutor};
use crate::error::{ConfigError, MotionError};
use crate::frame::{FlowField, PixelBuffer};

/// Flow in both temporal directions for one frame pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowPair {
    /// A to B: `A(p) ≈ B(p + forward(p))`.
    pub forward: FlowField,
    /// B to A.
    pub backward: FlowField,
}

impl FlowPair {
    pub fn width(&self) -> usize {
        self.forward.width()
    }

    pub fn height(&self) -> usize {
        self.forward.height()
    }

    pub fn matches(&self, frame: &PixelBuffer) -> bool {
        self.forward.matches(frame) && self.backward.matches(frame)
    }

    pub fn is_finite(&self) -> bool {
        self.forward.is_finite() && self.backward.is_finite()
    }
}

/// Dense pyramidal flow on the bound device.
#[derive(Debug, Clone)]
pub struct OpticalFlowEstimator {
    params: FlowParams,
    requirement: CapabilityRequirement,
}

impl OpticalFlowEstimator {
    pub fn new(params: FlowParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let requirement = CapabilityRequirement::for_families(&Self::kernel_families(&params));
        Ok(Self { params, requirement })
    }

    /// Kernels one estimate dispatches with these parameters.
    pub fn kernel_families(params: &FlowParams) -> Vec<KernelFamily> {
        let window = if params.flags.contains(FlowFlags::GAUSSIAN_WINDOW) {
            KernelFamily::GaussianBlur
        } else {
            KernelFamily::BoxFilter
        };
        vec![
            KernelFamily::GaussianBlur,
            KernelFamily::PolynomialExpansion,
            KernelFamily::FlowUpdate,
            window,
        ]
    }

    pub fn params(&self) -> &FlowParams {
        &self.params
    }

    pub fn requirement(&self) -> &CapabilityRequirement {
        &self.requirement
    }

    pub fn estimate(&self, registry: &DeviceRegistry, a: &PixelBuffer, b: &PixelBuffer) -> Result<FlowPair, MotionError> {
        self.estimate_seeded(registry, a, b, None)
    }

    /// Like [`estimate`](Self::estimate), starting from `seed` when the
    /// parameters carry `USE_INITIAL_FLOW` and the seed fits the frames.
    pub fn estimate_seeded(
        &self,
        registry: &DeviceRegistry,
        a: &PixelBuffer,
        b: &PixelBuffer,
        seed: Option<&FlowPair>,
    ) -> Result<FlowPair, MotionError> {
        check_pair(a, b)?;
        let session = admitted_session(registry, &self.requirement)?;

        let seed = match seed {
            Some(s) if !s.matches(a) => {
                warn!(
                    "Ignoring {}x{} seed flow for {}x{} frames",
                    s.width(),
                    s.height(),
                    a.width(),
                    a.height()
                );
                None
            }
            Some(s) if !s.is_finite() => {
                warn!("Ignoring seed flow with non-finite displacements");
                None
            }
            other => other,
        };

        let started = Instant::now();
        let flows = match session.executor() {
            Executor::Host(host) => self.estimate_host(host, a, b, seed)?,
            #[cfg(feature = "opencl")]
            Executor::OpenCl(cl) => cl.farneback(a, b, &self.params, seed)?,
        };
        debug!(
            "Flow for {}x{} pair on {} in {:?}",
            a.width(),
            a.height(),
            session.descriptor().device_name,
            started.elapsed()
        );
        Ok(flows)
    }

    fn estimate_host(
        &self,
        host: &HostExecutor,
        a: &PixelBuffer,
        b: &PixelBuffer,
        seed: Option<&FlowPair>,
    ) -> Result<FlowPair, MotionError> {
        let params = &self.params;
        let (forward, backward) = host.run("farneback", || {
            let (luma_a, luma_b) = rayon::join(|| a.luma_plane(), || b.luma_plane());
            rayon::join(
                || farneback::calc_flow(&luma_a, &luma_b, params, seed.map(|s| &s.forward)),
                || farneback::calc_flow(&luma_b, &luma_a, params, seed.map(|s| &s.backward)),
            )
        })?;
        Ok(FlowPair { forward, backward })
    }
}
