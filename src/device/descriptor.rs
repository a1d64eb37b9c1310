use serde::{Deserialize, Serialize};

/// Conformance profile reported by a platform or a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    Full,
    Embedded,
}

impl Profile {
    /// Parse a runtime profile string such as `FULL_PROFILE`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "FULL_PROFILE" | "FULL" => Profile::Full,
            _ => Profile::Embedded,
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Profile::Full => write!(f, "FULL_PROFILE"),
            Profile::Embedded => write!(f, "EMBEDDED_PROFILE"),
        }
    }
}

/// Comparable `major.minor` API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Read the version from the first whitespace-separated token that
    /// starts with a digit, ignoring vendor text around it.
    ///
    /// `"OpenCL 1.2 CUDA"` and `"2.1 AMD-APP (3004.6)"` both parse.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw
            .split_whitespace()
            .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))?;
        let mut parts = token.split('.');
        let major = leading_number(parts.next()?)?;
        let minor = parts.next().and_then(leading_number).unwrap_or(0);
        Some(Self { major, minor })
    }
}

fn leading_number(part: &str) -> Option<u32> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().ok()
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Platform attributes as a runtime reports them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub profile: Profile,
}

/// Device attributes as a runtime reports them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor_id: u32,
    pub driver_version: String,
    pub api_version: String,
    pub profile: Profile,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 3],
}

/// Where a descriptor came from, used to reopen the device on bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Locator {
    pub runtime: usize,
    pub platform: usize,
    pub device: usize,
}

/// Snapshot of one device taken at enumeration time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Position in enumeration order; the externally visible device number.
    pub index: usize,
    pub platform_name: String,
    pub platform_profile: Profile,
    pub vendor_id: u32,
    pub device_name: String,
    pub driver_version: String,
    pub api_version: String,
    pub profile: Profile,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 3],
    #[serde(skip)]
    pub(crate) locator: Locator,
}

impl DeviceDescriptor {
    pub(crate) fn assemble(index: usize, platform: &PlatformInfo, device: DeviceInfo, locator: Locator) -> Self {
        Self {
            index,
            platform_name: platform.name.clone(),
            platform_profile: platform.profile,
            vendor_id: device.vendor_id,
            device_name: device.name,
            driver_version: device.driver_version,
            api_version: device.api_version,
            profile: device.profile,
            max_work_group_size: device.max_work_group_size,
            max_work_item_sizes: device.max_work_item_sizes,
            locator,
        }
    }

    pub fn parsed_api_version(&self) -> Option<ApiVersion> {
        ApiVersion::parse(&self.api_version)
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.device_name, self.platform_name)
    }
}
