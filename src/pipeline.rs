//! Frame pair in, intermediate frames out.

use tracing::{debug, info};

use crate::config::{FlowFlags, FlowParams};
use crate::device::DeviceRegistry;
use crate::error::{ConfigError, MotionError, PipelineError};
use crate::frame::PixelBuffer;
use crate::motion::{check_pair, FlowPair, FrameSynthesizer, OpticalFlowEstimator, TimeStepPlanner};

/// Progress of the most recent interpolation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    DeviceSelected,
    FlowComputed,
    Synthesizing,
    Done,
    Failed,
}

/// Orchestrates device selection, flow estimation and synthesis.
///
/// Owns the device registry, so the bound device is the pipeline's for as
/// long as it lives. Runs are sequential: [`begin`](Self::begin) borrows
/// the pipeline mutably until the returned iterator is dropped.
pub struct InterpolationPipeline {
    registry: DeviceRegistry,
    estimator: OpticalFlowEstimator,
    synthesizer: FrameSynthesizer,
    state: PipelineState,
    previous_flow: Option<FlowPair>,
}

impl InterpolationPipeline {
    pub fn new(registry: DeviceRegistry, params: FlowParams) -> Result<Self, ConfigError> {
        let state = if registry.session().is_some() {
            PipelineState::DeviceSelected
        } else {
            PipelineState::Idle
        };
        Ok(Self {
            registry,
            estimator: OpticalFlowEstimator::new(params)?,
            synthesizer: FrameSynthesizer::new(),
            state,
            previous_flow: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Registry access for enumeration and rebinding. A rebind drops any
    /// flow kept for seeding.
    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        self.previous_flow = None;
        &mut self.registry
    }

    pub fn estimator(&self) -> &OpticalFlowEstimator {
        &self.estimator
    }

    /// Bind `index`, or the first compatible device when `None`.
    pub fn select_device(&mut self, index: Option<usize>) -> Result<usize, PipelineError> {
        let bound = match index {
            Some(i) => self.registry.bind(i).map(|()| i),
            None => self.registry.bind_first_compatible(),
        };
        match bound {
            Ok(i) => {
                self.state = PipelineState::DeviceSelected;
                self.previous_flow = None;
                Ok(i)
            }
            Err(e) => {
                self.state = PipelineState::Failed;
                Err(e.into())
            }
        }
    }

    /// Start interpolating `n` frames between `a` and `b`.
    ///
    /// Frames are produced one per `next()` call, in time order. Flow is
    /// estimated on the first call, so `n == 0` never estimates. Stopping
    /// early is allowed between frames.
    pub fn begin<'p>(
        &'p mut self,
        a: &'p PixelBuffer,
        b: &'p PixelBuffer,
        n: usize,
    ) -> Result<PairInterpolation<'p>, PipelineError> {
        self.begin_steps(a, b, TimeStepPlanner::plan(n))
    }

    /// Like [`begin`](Self::begin) with explicit time positions, each in
    /// [0, 1]. They are synthesized in ascending time order whatever order
    /// they are given in.
    pub fn begin_steps<'p>(
        &'p mut self,
        a: &'p PixelBuffer,
        b: &'p PixelBuffer,
        mut steps: Vec<f32>,
    ) -> Result<PairInterpolation<'p>, PipelineError> {
        if self.registry.session().is_none() {
            let index = self.select_device(None)?;
            info!("Auto-selected device {}", index);
        }
        let checked = match steps.iter().find(|t| !(0.0..=1.0).contains(*t)) {
            Some(&t) => Err(MotionError::InvalidTimeStep(t)),
            None => check_pair(a, b),
        };
        if let Err(e) = checked {
            self.state = PipelineState::Failed;
            return Err(PipelineError::InvalidInput(e));
        }
        steps.sort_by(f32::total_cmp);

        let finished = steps.is_empty();
        self.state = if finished {
            PipelineState::Done
        } else {
            PipelineState::DeviceSelected
        };
        Ok(PairInterpolation {
            pipeline: self,
            a,
            b,
            steps,
            next: 0,
            flows: None,
            finished,
        })
    }

    /// All `n` frames, or the first error. Nothing is returned on failure.
    pub fn interpolate(&mut self, a: &PixelBuffer, b: &PixelBuffer, n: usize) -> Result<Vec<PixelBuffer>, PipelineError> {
        self.begin(a, b, n)?.collect()
    }

    fn estimate(&mut self, a: &PixelBuffer, b: &PixelBuffer) -> Result<FlowPair, PipelineError> {
        let seeding = self.estimator.params().flags.contains(FlowFlags::USE_INITIAL_FLOW);
        let seed = if seeding { self.previous_flow.as_ref() } else { None };
        match self.estimator.estimate_seeded(&self.registry, a, b, seed) {
            Ok(flows) => {
                if seeding {
                    self.previous_flow = Some(flows.clone());
                }
                self.state = PipelineState::FlowComputed;
                Ok(flows)
            }
            Err(e) => {
                self.state = PipelineState::Failed;
                Err(PipelineError::FlowEstimation(e))
            }
        }
    }

    fn synthesize(&mut self, a: &PixelBuffer, b: &PixelBuffer, flows: &FlowPair, t: f32) -> Result<PixelBuffer, MotionError> {
        self.state = PipelineState::Synthesizing;
        self.synthesizer
            .synthesize(&self.registry, a, b, &flows.forward, &flows.backward, t)
            .map_err(|e| {
                self.state = PipelineState::Failed;
                e
            })
    }
}

/// Lazy run over one frame pair; yields frames in ascending time order and
/// stops after the first error.
pub struct PairInterpolation<'p> {
    pipeline: &'p mut InterpolationPipeline,
    a: &'p PixelBuffer,
    b: &'p PixelBuffer,
    steps: Vec<f32>,
    next: usize,
    flows: Option<FlowPair>,
    finished: bool,
}

impl PairInterpolation<'_> {
    /// Time positions of the whole run.
    pub fn steps(&self) -> &[f32] {
        &self.steps
    }

    /// Flow of this pair, once estimated.
    pub fn flows(&self) -> Option<&FlowPair> {
        self.flows.as_ref()
    }

    pub fn remaining(&self) -> usize {
        if self.finished {
            0
        } else {
            self.steps.len() - self.next
        }
    }
}

impl Iterator for PairInterpolation<'_> {
    type Item = Result<PixelBuffer, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.flows.is_none() {
            match self.pipeline.estimate(self.a, self.b) {
                Ok(flows) => self.flows = Some(flows),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        let flows = self.flows.as_ref()?;
        let t = self.steps[self.next];

        match self.pipeline.synthesize(self.a, self.b, flows, t) {
            Ok(frame) => {
                self.next += 1;
                if self.next == self.steps.len() {
                    self.finished = true;
                    self.pipeline.state = PipelineState::Done;
                    debug!("Pair done: {} frame(s)", self.steps.len());
                }
                Some(Ok(frame))
            }
            Err(source) => {
                self.finished = true;
                Some(Err(PipelineError::Synthesis { t, source }))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

impl Drop for PairInterpolation<'_> {
    /// A run stopped between frames is over, not stuck mid-synthesis.
    fn drop(&mut self) {
        if !self.finished {
            debug!("Pair stopped with {} frame(s) left", self.remaining());
            self.pipeline.state = PipelineState::Done;
        }
    }
}
