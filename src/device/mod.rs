pub mod capability;
pub mod descriptor;
pub mod executor;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod registry;
pub mod runtime;

pub use capability::{CapabilityRequirement, KernelFamily, Unmet};
pub use descriptor::{ApiVersion, DeviceDescriptor, Profile};
pub use executor::{DeviceSession, Executor, HostExecutor};
pub use registry::DeviceRegistry;
pub use runtime::{DeviceRuntime, HostRuntime, OpenOptions};
