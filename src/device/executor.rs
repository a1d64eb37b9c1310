use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::descriptor::DeviceDescriptor;
use crate::error::{MotionError, RuntimeError};

/// Runs host kernels on a dedicated rayon pool.
pub struct HostExecutor {
    pool: rayon::ThreadPool,
}

impl HostExecutor {
    pub fn new(threads: usize) -> Result<Self, RuntimeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("flowtween-host-{}", i))
            .build()
            .map_err(|e| RuntimeError::Open(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` inside the pool and wait for it. A panicking kernel is
    /// reported as an execution failure instead of unwinding into the caller.
    pub fn run<R, F>(&self, kernel: &'static str, job: F) -> Result<R, MotionError>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        panic::catch_unwind(AssertUnwindSafe(|| self.pool.install(job))).map_err(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "kernel panicked".to_string());
            MotionError::KernelExecutionFailed { kernel, reason }
        })
    }
}

/// Execution handle of an opened device.
pub enum Executor {
    Host(HostExecutor),
    #[cfg(feature = "opencl")]
    OpenCl(super::opencl::OpenClExecutor),
}

impl Executor {
    /// Host pool used for the stages that always run on the CPU side.
    pub fn host(&self) -> &HostExecutor {
        match self {
            Executor::Host(host) => host,
            #[cfg(feature = "opencl")]
            Executor::OpenCl(cl) => cl.host(),
        }
    }
}

/// The bound device: its descriptor and the executor opened for it.
#[derive(Clone)]
pub struct DeviceSession {
    descriptor: Arc<DeviceDescriptor>,
    executor: Arc<Executor>,
}

impl DeviceSession {
    pub(crate) fn new(descriptor: DeviceDescriptor, executor: Executor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            executor: Arc::new(executor),
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.descriptor.device_name)
            .field("index", &self.descriptor.index)
            .finish()
    }
}
