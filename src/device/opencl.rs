//! OpenCL devices through OpenCV's `ocl` module.
//!
//! OpenCV does not report platform or device profiles, so every device it
//! lists is described as full profile and admission rests on the version
//! and work-size predicates.

use std::sync::Mutex;

use opencv::{core, prelude::*, video};
use tracing::{debug, info};

use super::descriptor::{DeviceInfo, PlatformInfo, Profile};
use super::executor::{Executor, HostExecutor};
use super::runtime::{DeviceRuntime, OpenOptions};
use crate::config::FlowParams;
use crate::error::{MotionError, RuntimeError};
use crate::frame::{FlowField, PixelBuffer, Plane};
use crate::motion::FlowPair;

/// Environment variable OpenCV reads for its compiled program cache.
const CACHE_DIR_VAR: &str = "OPENCV_OPENCL_CACHE_DIR";

fn query_err(e: opencv::Error) -> RuntimeError {
    RuntimeError::Query(e.to_string())
}

fn open_err(e: opencv::Error) -> RuntimeError {
    RuntimeError::Open(e.to_string())
}

fn kernel_err(e: opencv::Error) -> MotionError {
    MotionError::KernelExecutionFailed {
        kernel: "farneback",
        reason: e.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct OpenClRuntime;

impl OpenClRuntime {
    pub fn new() -> Self {
        Self
    }

    fn platform_handles(&self) -> Result<core::Vector<core::PlatformInfo>, RuntimeError> {
        let mut platforms = core::Vector::<core::PlatformInfo>::new();
        if !core::have_opencl().map_err(query_err)? {
            return Ok(platforms);
        }
        core::get_platfoms_info(&mut platforms).map_err(query_err)?;
        Ok(platforms)
    }

    fn device_handle(&self, platform: usize, device: usize) -> Result<(core::PlatformInfo, core::Device), RuntimeError> {
        let platform_info = self
            .platform_handles()?
            .get(platform)
            .map_err(|_| RuntimeError::Query(format!("no OpenCL platform {}", platform)))?;
        let mut handle = core::Device::default();
        platform_info.get_device(&mut handle, device as i32).map_err(query_err)?;
        Ok((platform_info, handle))
    }
}

impl DeviceRuntime for OpenClRuntime {
    fn name(&self) -> &str {
        "opencl"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>, RuntimeError> {
        let mut out = Vec::new();
        for p in self.platform_handles()? {
            out.push(PlatformInfo {
                name: p.name().map_err(query_err)?,
                vendor: p.vendor().map_err(query_err)?,
                version: p.version().map_err(query_err)?,
                profile: Profile::Full,
            });
        }
        Ok(out)
    }

    fn devices(&self, platform: usize) -> Result<Vec<DeviceInfo>, RuntimeError> {
        let platform_info = self
            .platform_handles()?
            .get(platform)
            .map_err(|_| RuntimeError::Query(format!("no OpenCL platform {}", platform)))?;
        let count = platform_info.device_number().map_err(query_err)?.max(0);

        let mut devices = Vec::with_capacity(count as usize);
        for d in 0..count {
            let mut dev = core::Device::default();
            platform_info.get_device(&mut dev, d).map_err(query_err)?;
            let mut items = [0usize; 3];
            // The binding fills three consecutive values starting here
            dev.max_work_item_sizes(&mut items[0]).map_err(query_err)?;
            devices.push(DeviceInfo {
                name: dev.name().map_err(query_err)?,
                vendor_id: dev.vendor_id().map_err(query_err)? as u32,
                driver_version: dev.driver_version().map_err(query_err)?,
                api_version: dev.version().map_err(query_err)?,
                profile: Profile::Full,
                max_work_group_size: dev.max_work_group_size().map_err(query_err)?,
                max_work_item_sizes: items,
            });
        }
        Ok(devices)
    }

    fn open(&self, platform: usize, device: usize, options: &OpenOptions) -> Result<Executor, RuntimeError> {
        if let Some(cache) = &options.kernel_cache {
            std::fs::create_dir_all(cache).map_err(|e| RuntimeError::Open(e.to_string()))?;
            std::env::set_var(CACHE_DIR_VAR, cache);
            debug!("OpenCL kernel cache at {}", cache.display());
        }
        let (platform_info, handle) = self.device_handle(platform, device)?;
        let platform_name = platform_info.name().map_err(open_err)?;
        let device_name = handle.name().map_err(open_err)?;

        core::set_use_opencl(true).map_err(open_err)?;
        let context = core::OpenCLExecutionContext::create(&platform_name, &device_name).map_err(open_err)?;
        info!("OpenCL context on {} / {}", platform_name, device_name);

        Ok(Executor::OpenCl(OpenClExecutor {
            context: Mutex::new(context),
            host: HostExecutor::new(options.host_threads())?,
        }))
    }
}

/// A bound OpenCL device. Dispatches are serialized through the context
/// lock; stages without a device kernel run on the host pool.
pub struct OpenClExecutor {
    context: Mutex<core::OpenCLExecutionContext>,
    host: HostExecutor,
}

impl OpenClExecutor {
    pub fn host(&self) -> &HostExecutor {
        &self.host
    }

    pub fn farneback(
        &self,
        a: &PixelBuffer,
        b: &PixelBuffer,
        params: &FlowParams,
        seed: Option<&FlowPair>,
    ) -> Result<FlowPair, MotionError> {
        let context = self.context.lock().map_err(|_| MotionError::KernelExecutionFailed {
            kernel: "farneback",
            reason: "OpenCL context lock poisoned".into(),
        })?;
        context.bind().map_err(kernel_err)?;

        let luma_a = to_umat(&a.luma_plane()).map_err(kernel_err)?;
        let luma_b = to_umat(&b.luma_plane()).map_err(kernel_err)?;
        let forward = run_farneback(&luma_a, &luma_b, params, seed.map(|s| &s.forward)).map_err(kernel_err)?;
        let backward = run_farneback(&luma_b, &luma_a, params, seed.map(|s| &s.backward)).map_err(kernel_err)?;
        Ok(FlowPair { forward, backward })
    }
}

fn to_umat(plane: &Plane) -> opencv::Result<core::UMat> {
    let bytes: Vec<u8> = plane
        .data()
        .iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    let mat = Mat::new_rows_cols_with_data(plane.height() as i32, plane.width() as i32, &bytes)?;
    let mut umat = core::UMat::new_def();
    mat.copy_to(&mut umat)?;
    Ok(umat)
}

fn run_farneback(
    prev: &core::UMat,
    next: &core::UMat,
    params: &FlowParams,
    seed: Option<&FlowField>,
) -> opencv::Result<FlowField> {
    let seed = seed.filter(|s| s.width() == prev.cols() as usize && s.height() == prev.rows() as usize);
    let mut flow = core::UMat::new_def();
    if let Some(seed) = seed {
        let packed: Vec<core::Vec2f> = seed
            .dx()
            .iter()
            .zip(seed.dy())
            .map(|(&dx, &dy)| core::Vec2f::from([dx, dy]))
            .collect();
        let mat = Mat::new_rows_cols_with_data(seed.height() as i32, seed.width() as i32, &packed)?;
        mat.copy_to(&mut flow)?;
    }

    // Flag bits share the OpenCV numbering
    let mut algo = video::FarnebackOpticalFlow::create(
        params.levels as i32,
        params.pyramid_scale,
        params.use_fast_pyramids,
        params.window_size as i32,
        params.iterations as i32,
        params.poly_expansion_neighborhood as i32,
        params.poly_expansion_sigma,
        params.effective_flags(seed.is_some()).bits() as i32,
    )?;
    algo.calc(prev, next, &mut flow)?;

    let mut host = Mat::default();
    flow.copy_to(&mut host)?;
    let (width, height) = (host.cols() as usize, host.rows() as usize);
    let mut dx = Vec::with_capacity(width * height);
    let mut dy = Vec::with_capacity(width * height);
    for v in host.data_typed::<core::Vec2f>()? {
        dx.push(v[0]);
        dy.push(v[1]);
    }
    FlowField::from_components(width, height, dx, dy)
        .map_err(|e| opencv::Error::new(core::StsError, e.to_string()))
}
