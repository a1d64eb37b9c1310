use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::capability::{self, CapabilityRequirement};
use super::descriptor::{DeviceDescriptor, Locator};
use super::executor::DeviceSession;
use super::runtime::{DeviceRuntime, HostRuntime, OpenOptions};
use crate::error::{DeviceError, Rejection};

/// Enumerates devices across runtimes and owns the single bound device.
///
/// The enumeration is taken once and kept for the registry's lifetime, so
/// device indices stay stable. Mutating calls take `&mut self`; share the
/// registry behind a lock if several threads need to rebind.
pub struct DeviceRegistry {
    runtimes: Vec<Arc<dyn DeviceRuntime>>,
    requirement: CapabilityRequirement,
    options: OpenOptions,
    devices: Option<Vec<DeviceDescriptor>>,
    bound: Option<DeviceSession>,
}

impl DeviceRegistry {
    /// Runtimes are queried in the order given.
    pub fn new(runtimes: Vec<Arc<dyn DeviceRuntime>>) -> Self {
        Self {
            runtimes,
            requirement: CapabilityRequirement::pipeline(),
            options: OpenOptions::default(),
            devices: None,
            bound: None,
        }
    }

    /// Every runtime compiled in: accelerators first, the host last.
    pub fn system(options: OpenOptions) -> Self {
        let mut runtimes: Vec<Arc<dyn DeviceRuntime>> = Vec::new();
        #[cfg(feature = "opencl")]
        runtimes.push(Arc::new(super::opencl::OpenClRuntime::new()));
        runtimes.push(Arc::new(HostRuntime::new()));
        Self::new(runtimes).with_options(options)
    }

    /// Only the host runtime.
    pub fn host() -> Self {
        let host: Arc<dyn DeviceRuntime> = Arc::new(HostRuntime::new());
        Self::new(vec![host])
    }

    pub fn with_options(mut self, options: OpenOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_requirement(mut self, requirement: CapabilityRequirement) -> Self {
        self.requirement = requirement;
        self
    }

    pub fn requirement(&self) -> &CapabilityRequirement {
        &self.requirement
    }

    /// Forwarded to the runtime on the next `bind`.
    pub fn set_kernel_cache(&mut self, path: impl Into<PathBuf>) {
        self.options.kernel_cache = Some(path.into());
    }

    pub fn kernel_cache(&self) -> Option<&Path> {
        self.options.kernel_cache.as_deref()
    }

    /// All devices in (runtime, platform, device) discovery order.
    pub fn enumerate(&mut self) -> Result<&[DeviceDescriptor], DeviceError> {
        if self.devices.is_none() {
            let found = self.discover()?;
            info!("Enumerated {} device(s)", found.len());
            self.devices = Some(found);
        }
        Ok(self.devices.as_deref().unwrap_or(&[]))
    }

    fn discover(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let mut found = Vec::new();
        for (r, runtime) in self.runtimes.iter().enumerate() {
            let platforms = runtime.platforms().map_err(DeviceError::DeviceQueryFailed)?;
            for (p, platform) in platforms.iter().enumerate() {
                let devices = match runtime.devices(p) {
                    Ok(devices) => devices,
                    Err(e) => {
                        warn!("Skipping platform {} ({}): {}", platform.name, runtime.name(), e);
                        continue;
                    }
                };
                for (d, info) in devices.into_iter().enumerate() {
                    let locator = Locator {
                        runtime: r,
                        platform: p,
                        device: d,
                    };
                    let descriptor = DeviceDescriptor::assemble(found.len(), platform, info, locator);
                    debug!(
                        "Device {}: {} ({}, {}, wg={}, items={:?})",
                        descriptor.index,
                        descriptor,
                        descriptor.api_version,
                        descriptor.profile,
                        descriptor.max_work_group_size,
                        descriptor.max_work_item_sizes
                    );
                    found.push(descriptor);
                }
            }
        }
        Ok(found)
    }

    /// Make the device at `index` the active one.
    pub fn bind(&mut self, index: usize) -> Result<(), DeviceError> {
        let (device, count) = {
            let devices = self.enumerate()?;
            (devices.get(index).cloned(), devices.len())
        };
        let device = device.ok_or(DeviceError::IndexOutOfRange { index, count })?;

        let unmet = capability::evaluate(&device, &self.requirement);
        if !unmet.is_empty() {
            return Err(DeviceError::IncompatibleDevice {
                index,
                device: device.device_name.clone(),
                unmet,
            });
        }

        let loc = device.locator;
        let runtime = self
            .runtimes
            .get(loc.runtime)
            .ok_or(DeviceError::IndexOutOfRange { index, count })?;
        let executor = runtime
            .open(loc.platform, loc.device, &self.options)
            .map_err(|source| DeviceError::BindFailed { index, source })?;

        info!("Bound device {}: {}", index, device);
        self.bound = Some(DeviceSession::new(device, executor));
        Ok(())
    }

    /// Index of the first device passing the gate, if any.
    pub fn first_compatible(&mut self) -> Result<Option<usize>, DeviceError> {
        let requirement = self.requirement.clone();
        let devices = self.enumerate()?;
        Ok(capability::first_compatible(devices, &requirement).map(|d| d.index))
    }

    /// Bind the first compatible device, reporting every rejection when
    /// none qualifies.
    pub fn bind_first_compatible(&mut self) -> Result<usize, DeviceError> {
        match self.first_compatible()? {
            Some(index) => {
                self.bind(index)?;
                Ok(index)
            }
            None => Err(DeviceError::NoCompatibleDevice {
                rejected: self.rejections()?,
            }),
        }
    }

    /// Every enumerated device that fails the gate, with its reasons.
    pub fn rejections(&mut self) -> Result<Vec<Rejection>, DeviceError> {
        let requirement = self.requirement.clone();
        let devices = self.enumerate()?;
        Ok(devices
            .iter()
            .filter_map(|d| {
                let unmet = capability::evaluate(d, &requirement);
                (!unmet.is_empty()).then(|| Rejection {
                    index: d.index,
                    device: d.device_name.clone(),
                    unmet,
                })
            })
            .collect())
    }

    pub fn current_device(&self) -> Option<&DeviceDescriptor> {
        self.bound.as_ref().map(|s| s.descriptor())
    }

    pub fn session(&self) -> Option<&DeviceSession> {
        self.bound.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::descriptor::{DeviceInfo, PlatformInfo, Profile};
    use crate::device::executor::{Executor, HostExecutor};
    use crate::error::RuntimeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info(name: &str, work_group: usize) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            vendor_id: 0x1002,
            driver_version: "3004.6".into(),
            api_version: "OpenCL 2.0 AMD-APP".into(),
            profile: Profile::Full,
            max_work_group_size: work_group,
            max_work_item_sizes: [1024, 1024, 1024],
        }
    }

    fn platform(name: &str, profile: Profile) -> PlatformInfo {
        PlatformInfo {
            name: name.to_string(),
            vendor: "Fake".into(),
            version: "OpenCL 2.0".into(),
            profile,
        }
    }

    /// Scripted runtime: `None` device lists fail their platform query.
    struct FakeRuntime {
        platforms: Vec<(PlatformInfo, Option<Vec<DeviceInfo>>)>,
        fail_platforms: bool,
        platform_queries: AtomicUsize,
    }

    impl FakeRuntime {
        fn new(platforms: Vec<(PlatformInfo, Option<Vec<DeviceInfo>>)>) -> Self {
            Self {
                platforms,
                fail_platforms: false,
                platform_queries: AtomicUsize::new(0),
            }
        }
    }

    impl DeviceRuntime for FakeRuntime {
        fn name(&self) -> &str {
            "fake"
        }

        fn platforms(&self) -> Result<Vec<PlatformInfo>, RuntimeError> {
            self.platform_queries.fetch_add(1, Ordering::SeqCst);
            if self.fail_platforms {
                return Err(RuntimeError::Query("driver gone".into()));
            }
            Ok(self.platforms.iter().map(|(p, _)| p.clone()).collect())
        }

        fn devices(&self, platform: usize) -> Result<Vec<DeviceInfo>, RuntimeError> {
            self.platforms[platform]
                .1
                .clone()
                .ok_or_else(|| RuntimeError::Query("CL_DEVICE_NOT_FOUND".into()))
        }

        fn open(&self, _platform: usize, _device: usize, _options: &OpenOptions) -> Result<Executor, RuntimeError> {
            Ok(Executor::Host(HostExecutor::new(1)?))
        }
    }

    fn registry(runtime: FakeRuntime) -> DeviceRegistry {
        let runtime: Arc<dyn DeviceRuntime> = Arc::new(runtime);
        DeviceRegistry::new(vec![runtime])
    }

    #[test]
    fn enumeration_orders_by_platform_then_device() {
        let mut reg = registry(FakeRuntime::new(vec![
            (platform("A", Profile::Full), Some(vec![info("a0", 256), info("a1", 256)])),
            (platform("B", Profile::Full), Some(vec![info("b0", 256)])),
        ]));
        let names: Vec<_> = reg
            .enumerate()
            .unwrap()
            .iter()
            .map(|d| (d.index, d.device_name.clone(), d.platform_name.clone()))
            .collect();
        assert_eq!(
            names,
            vec![
                (0, "a0".to_string(), "A".to_string()),
                (1, "a1".to_string(), "A".to_string()),
                (2, "b0".to_string(), "B".to_string()),
            ]
        );
    }

    #[test]
    fn enumeration_is_cached_for_the_session() {
        let runtime = Arc::new(FakeRuntime::new(vec![(platform("A", Profile::Full), Some(vec![info("a0", 256)]))]));
        let shared: Arc<dyn DeviceRuntime> = runtime.clone();
        let mut reg = DeviceRegistry::new(vec![shared]);
        let first = reg.enumerate().unwrap().to_vec();
        let second = reg.enumerate().unwrap().to_vec();
        assert_eq!(first, second);
        assert_eq!(runtime.platform_queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_platform_is_skipped() {
        let mut reg = registry(FakeRuntime::new(vec![
            (platform("Broken", Profile::Full), None),
            (platform("Good", Profile::Full), Some(vec![info("g0", 256)])),
        ]));
        let devices = reg.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].platform_name, "Good");
    }

    #[test]
    fn fatal_query_failure_aborts_and_can_be_retried() {
        let mut runtime = FakeRuntime::new(vec![(platform("A", Profile::Full), Some(vec![info("a0", 256)]))]);
        runtime.fail_platforms = true;
        let mut reg = registry(runtime);
        assert!(matches!(reg.enumerate(), Err(DeviceError::DeviceQueryFailed(_))));
        // Nothing cached after a failure
        assert!(matches!(reg.enumerate(), Err(DeviceError::DeviceQueryFailed(_))));
    }

    #[test]
    fn bind_past_the_end_is_out_of_range() {
        let mut reg = registry(FakeRuntime::new(vec![(
            platform("A", Profile::Full),
            Some(vec![info("weak", 64), info("ok", 256)]),
        )]));
        let count = reg.enumerate().unwrap().len();
        match reg.bind(count) {
            Err(DeviceError::IndexOutOfRange { index, count: c }) => {
                assert_eq!(index, 2);
                assert_eq!(c, 2);
            }
            other => panic!("expected IndexOutOfRange, got {:?}", other.err()),
        }
        assert!(reg.current_device().is_none());
    }

    #[test]
    fn bind_rejects_incompatible_devices() {
        let mut reg = registry(FakeRuntime::new(vec![
            (platform("Embedded", Profile::Embedded), Some(vec![info("e0", 256)])),
            (platform("A", Profile::Full), Some(vec![info("weak", 64)])),
        ]));
        assert!(matches!(reg.bind(0), Err(DeviceError::IncompatibleDevice { index: 0, .. })));
        assert!(matches!(reg.bind(1), Err(DeviceError::IncompatibleDevice { index: 1, .. })));
        assert!(reg.current_device().is_none());

        match reg.bind_first_compatible() {
            Err(DeviceError::NoCompatibleDevice { rejected }) => {
                assert_eq!(rejected.len(), 2);
                assert_eq!(rejected[0].device, "e0");
            }
            other => panic!("expected NoCompatibleDevice, got {:?}", other),
        }
    }

    #[test]
    fn auto_selection_binds_first_compatible() {
        let mut reg = registry(FakeRuntime::new(vec![
            (platform("Embedded", Profile::Embedded), Some(vec![info("e0", 1024)])),
            (platform("A", Profile::Full), Some(vec![info("a0", 128), info("a1", 512), info("a2", 1024)])),
        ]));
        assert_eq!(reg.first_compatible().unwrap(), Some(2));
        assert_eq!(reg.bind_first_compatible().unwrap(), 2);
        assert_eq!(reg.current_device().map(|d| d.device_name.as_str()), Some("a1"));
    }

    #[test]
    fn rebinding_replaces_the_session() {
        let mut reg = registry(FakeRuntime::new(vec![(
            platform("A", Profile::Full),
            Some(vec![info("a0", 256), info("a1", 256)]),
        )]));
        reg.bind(0).unwrap();
        assert_eq!(reg.current_device().map(|d| d.index), Some(0));
        reg.bind(1).unwrap();
        assert_eq!(reg.current_device().map(|d| d.index), Some(1));
    }

    #[test]
    fn kernel_cache_path_is_kept() {
        let mut reg = DeviceRegistry::host();
        assert!(reg.kernel_cache().is_none());
        reg.set_kernel_cache("/tmp/flowtween-kernels");
        assert_eq!(reg.kernel_cache(), Some(Path::new("/tmp/flowtween-kernels")));
        reg.bind(0).unwrap();
        assert!(reg.session().is_some());
    }
}
