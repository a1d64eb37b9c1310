use std::sync::Arc;

use flowtween::device::capability::{self, KernelFamily};
use flowtween::device::descriptor::{DeviceInfo, PlatformInfo};
use flowtween::device::{DeviceRuntime, Executor, HostExecutor, OpenOptions, Profile, Unmet};
use flowtween::error::RuntimeError;
use flowtween::{
    CapabilityRequirement, DeviceError, DeviceRegistry, FlowParams, InterpolationPipeline, MotionError,
    OpticalFlowEstimator, PipelineError, PipelineState, PixelBuffer,
};

/// An embedded board with one small device next to a desktop card.
struct Workstation;

impl Workstation {
    fn device(name: &str, profile: Profile, work_group: usize) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            vendor_id: 0x10de,
            driver_version: "535.54".into(),
            api_version: "OpenCL 3.0 CUDA".into(),
            profile,
            max_work_group_size: work_group,
            max_work_item_sizes: [1024, 1024, 64],
        }
    }
}

impl DeviceRuntime for Workstation {
    fn name(&self) -> &str {
        "workstation"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>, RuntimeError> {
        Ok(vec![
            PlatformInfo {
                name: "Board".into(),
                vendor: "Embedded Inc".into(),
                version: "OpenCL 1.2".into(),
                profile: Profile::Embedded,
            },
            PlatformInfo {
                name: "Desktop".into(),
                vendor: "GPU Corp".into(),
                version: "OpenCL 3.0".into(),
                profile: Profile::Full,
            },
        ])
    }

    fn devices(&self, platform: usize) -> Result<Vec<DeviceInfo>, RuntimeError> {
        Ok(match platform {
            0 => vec![Self::device("board-gpu", Profile::Embedded, 128)],
            _ => vec![Self::device("desktop-gpu", Profile::Full, 1024)],
        })
    }

    fn open(&self, _platform: usize, _device: usize, options: &OpenOptions) -> Result<Executor, RuntimeError> {
        Ok(Executor::Host(HostExecutor::new(options.host_threads().min(2))?))
    }
}

fn workstation() -> DeviceRegistry {
    let runtime: Arc<dyn DeviceRuntime> = Arc::new(Workstation);
    DeviceRegistry::new(vec![runtime])
}

fn quick_params() -> FlowParams {
    FlowParams {
        levels: 1,
        window_size: 7,
        iterations: 2,
        ..FlowParams::default()
    }
}

fn gradient(width: usize, height: usize) -> PixelBuffer {
    let data = (0..height)
        .flat_map(|y| (0..width).flat_map(move |x| [(x * 4) as u8, (y * 4) as u8, 128]))
        .collect();
    PixelBuffer::new(width, height, 3, data).unwrap()
}

#[test]
fn host_registry_has_one_compatible_device() {
    let mut registry = DeviceRegistry::host();
    let devices = registry.enumerate().unwrap().to_vec();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].index, 0);
    assert!(capability::is_compatible(&devices[0], &CapabilityRequirement::pipeline()));
    assert_eq!(registry.bind_first_compatible().unwrap(), 0);
    assert_eq!(registry.current_device().map(|d| d.index), Some(0));
}

#[test]
fn binding_past_the_last_device_is_out_of_range() {
    let mut registry = DeviceRegistry::host();
    let count = registry.enumerate().unwrap().len();
    match registry.bind(count) {
        Err(DeviceError::IndexOutOfRange { index, count: c }) => {
            assert_eq!(index, count);
            assert_eq!(c, count);
        }
        other => panic!("unexpected {:?}", other.err()),
    }
    assert!(registry.session().is_none());
}

#[test]
fn embedded_platforms_are_never_admitted() {
    let mut registry = workstation();
    match registry.bind(0) {
        Err(DeviceError::IncompatibleDevice { index, unmet, .. }) => {
            assert_eq!(index, 0);
            assert!(unmet.contains(&Unmet::DeviceProfile { found: Profile::Embedded }));
            assert!(unmet.contains(&Unmet::PlatformProfile { found: Profile::Embedded }));
            assert!(unmet.iter().any(|u| matches!(u, Unmet::WorkGroupSize { found: 128, .. })));
        }
        other => panic!("unexpected {:?}", other.err()),
    }

    assert_eq!(registry.bind_first_compatible().unwrap(), 1);
    assert_eq!(registry.current_device().unwrap().device_name, "desktop-gpu");
    let rejections = registry.rejections().unwrap();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].device, "board-gpu");
}

#[test]
fn stricter_requirements_can_reject_everything() {
    let mut strict = CapabilityRequirement::for_family(KernelFamily::BoxFilter);
    strict.min_work_item_sizes = [256, 256, 256];
    let mut registry = workstation().with_requirement(strict);
    match registry.bind_first_compatible() {
        Err(DeviceError::NoCompatibleDevice { rejected }) => {
            assert_eq!(rejected.len(), 2);
            assert!(rejected
                .iter()
                .all(|r| r.unmet.iter().any(|u| matches!(u, Unmet::WorkItemSize { dimension: 2, .. }))));
        }
        other => panic!("unexpected {:?}", other.err()),
    }
}

#[test]
fn estimation_needs_a_bound_device() {
    let registry = DeviceRegistry::host();
    let estimator = OpticalFlowEstimator::new(quick_params()).unwrap();
    let frame = gradient(32, 32);
    let err = estimator.estimate(&registry, &frame, &frame).unwrap_err();
    assert!(matches!(err, MotionError::NoCompatibleDevice { device: None, .. }));
}

#[test]
fn pipeline_runs_on_the_rebound_device() {
    let mut pipeline = InterpolationPipeline::new(workstation(), quick_params()).unwrap();
    assert!(matches!(
        pipeline.select_device(Some(0)),
        Err(PipelineError::DeviceSelection(DeviceError::IncompatibleDevice { .. }))
    ));
    assert_eq!(pipeline.state(), PipelineState::Failed);

    assert_eq!(pipeline.select_device(Some(1)).unwrap(), 1);
    let (a, b) = (gradient(32, 24), gradient(32, 24));
    let frames = pipeline.interpolate(&a, &b, 2).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(pipeline.registry().current_device().unwrap().index, 1);
}

#[test]
fn auto_selection_skips_the_embedded_board() {
    let mut pipeline = InterpolationPipeline::new(workstation(), quick_params()).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Idle);
    let frame = gradient(16, 16);
    pipeline.interpolate(&frame, &frame, 1).unwrap();
    assert_eq!(pipeline.registry().current_device().unwrap().device_name, "desktop-gpu");
}

/// A full-profile card whose first work-item dimension only covers the flow update kernels.
struct NarrowCard;

impl DeviceRuntime for NarrowCard {
    fn name(&self) -> &str {
        "narrow"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>, RuntimeError> {
        Ok(vec![PlatformInfo {
            name: "Desktop".into(),
            vendor: "GPU Corp".into(),
            version: "OpenCL 3.0".into(),
            profile: Profile::Full,
        }])
    }

    fn devices(&self, _platform: usize) -> Result<Vec<DeviceInfo>, RuntimeError> {
        let mut device = Workstation::device("narrow-gpu", Profile::Full, 1024);
        device.max_work_item_sizes = [64, 8, 1];
        Ok(vec![device])
    }

    fn open(&self, _platform: usize, _device: usize, options: &OpenOptions) -> Result<Executor, RuntimeError> {
        Ok(Executor::Host(HostExecutor::new(options.host_threads().min(2))?))
    }
}

fn narrow_card() -> DeviceRegistry {
    let runtime: Arc<dyn DeviceRuntime> = Arc::new(NarrowCard);
    DeviceRegistry::new(vec![runtime]).with_requirement(CapabilityRequirement::for_family(KernelFamily::FlowUpdate))
}

#[test]
fn estimation_rechecks_the_selected_device() {
    let mut pipeline = InterpolationPipeline::new(narrow_card(), quick_params()).unwrap();
    assert_eq!(pipeline.select_device(Some(0)).unwrap(), 0);
    assert_eq!(pipeline.state(), PipelineState::DeviceSelected);

    let (a, b) = (gradient(32, 24), gradient(32, 24));
    let err = pipeline.interpolate(&a, &b, 2).unwrap_err();
    assert_eq!(err.stage(), "flow estimation");
    match &err {
        PipelineError::FlowEstimation(MotionError::NoCompatibleDevice { device, unmet }) => {
            assert_eq!(device.as_deref(), Some("narrow-gpu"));
            assert!(unmet
                .iter()
                .any(|u| matches!(u, Unmet::WorkItemSize { dimension: 0, found: 64, .. })));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(pipeline.state(), PipelineState::Failed);

    // The lazy form reports the same failure once, then ends
    let mut run = pipeline.begin(&a, &b, 2).unwrap();
    assert!(matches!(run.next(), Some(Err(PipelineError::FlowEstimation(_)))));
    assert!(run.next().is_none());
    drop(run);
    assert_eq!(pipeline.state(), PipelineState::Failed);
}
