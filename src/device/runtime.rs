use std::path::PathBuf;

use tracing::debug;

use super::descriptor::{DeviceInfo, PlatformInfo, Profile};
use super::executor::{Executor, HostExecutor};
use crate::error::RuntimeError;

/// Options handed to a runtime when a device is opened.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Directory for compiled kernel binaries. Opaque to this crate.
    pub kernel_cache: Option<PathBuf>,
    /// Worker count for host-side execution; `None` uses every core.
    pub threads: Option<usize>,
}

impl OpenOptions {
    pub fn host_threads(&self) -> usize {
        self.threads.filter(|&n| n > 0).unwrap_or_else(num_cpus::get)
    }
}

/// A source of execution devices.
///
/// `platforms` failing aborts enumeration as a whole; `devices` failing only
/// drops that platform from the result.
pub trait DeviceRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn platforms(&self) -> Result<Vec<PlatformInfo>, RuntimeError>;

    fn devices(&self, platform: usize) -> Result<Vec<DeviceInfo>, RuntimeError>;

    fn open(&self, platform: usize, device: usize, options: &OpenOptions) -> Result<Executor, RuntimeError>;
}

pub const HOST_PLATFORM_NAME: &str = "Host";

/// The CPU, driven by a rayon pool. Always present.
#[derive(Debug, Clone, Default)]
pub struct HostRuntime;

impl HostRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceRuntime for HostRuntime {
    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>, RuntimeError> {
        Ok(vec![PlatformInfo {
            name: HOST_PLATFORM_NAME.to_string(),
            vendor: "flowtween".to_string(),
            version: format!("Host 1.2 flowtween-{}", env!("CARGO_PKG_VERSION")),
            profile: Profile::Full,
        }])
    }

    fn devices(&self, platform: usize) -> Result<Vec<DeviceInfo>, RuntimeError> {
        if platform != 0 {
            return Err(RuntimeError::Query(format!("host runtime has no platform {}", platform)));
        }
        // Limits clear every kernel family's launch shape
        Ok(vec![DeviceInfo {
            name: format!("CPU ({} threads)", num_cpus::get()),
            vendor_id: 0,
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: "Host 1.2".to_string(),
            profile: Profile::Full,
            max_work_group_size: 1024,
            max_work_item_sizes: [1024, 1024, 64],
        }])
    }

    fn open(&self, platform: usize, device: usize, options: &OpenOptions) -> Result<Executor, RuntimeError> {
        if platform != 0 || device != 0 {
            return Err(RuntimeError::Open(format!("no host device {}:{}", platform, device)));
        }
        if let Some(cache) = &options.kernel_cache {
            debug!("Host runtime ignores kernel cache {}", cache.display());
        }
        let threads = options.host_threads();
        debug!("Opening host executor with {} threads", threads);
        Ok(Executor::Host(HostExecutor::new(threads)?))
    }
}
