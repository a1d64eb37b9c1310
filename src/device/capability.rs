//! Declarative device admission.
//!
//! Each kernel family states the minimum device it needs as a
//! [`CapabilityRequirement`]; a device is admitted when it satisfies every
//! predicate of the element-wise maximum over the families in use.

use serde::Serialize;

use super::descriptor::{ApiVersion, DeviceDescriptor, Profile};

pub const MIN_API_VERSION: ApiVersion = ApiVersion::new(1, 2);
pub const MIN_WORK_GROUP_SIZE: usize = 256;

/// Kernel groups dispatched by the flow and interpolation stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KernelFamily {
    FlowUpdate,
    BoxFilter,
    FlowAccumulation,
    GaussianBlur,
    PolynomialExpansion,
}

impl KernelFamily {
    pub const ALL: [KernelFamily; 5] = [
        KernelFamily::FlowUpdate,
        KernelFamily::BoxFilter,
        KernelFamily::FlowAccumulation,
        KernelFamily::GaussianBlur,
        KernelFamily::PolynomialExpansion,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KernelFamily::FlowUpdate => "flow-update",
            KernelFamily::BoxFilter => "box-filter",
            KernelFamily::FlowAccumulation => "flow-accumulation",
            KernelFamily::GaussianBlur => "gaussian-blur",
            KernelFamily::PolynomialExpansion => "polynomial-expansion",
        }
    }

    /// Local work sizes the kernel is launched with.
    pub fn min_work_item_sizes(self) -> [usize; 3] {
        match self {
            KernelFamily::FlowUpdate | KernelFamily::FlowAccumulation => [32, 8, 1],
            KernelFamily::BoxFilter | KernelFamily::GaussianBlur | KernelFamily::PolynomialExpansion => [256, 1, 1],
        }
    }
}

/// Minimum device profile for a set of kernels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRequirement {
    pub name: String,
    pub min_api_version: ApiVersion,
    pub profile: Profile,
    pub min_work_group_size: usize,
    pub min_work_item_sizes: [usize; 3],
}

impl CapabilityRequirement {
    pub fn for_family(family: KernelFamily) -> Self {
        Self {
            name: family.name().to_string(),
            min_api_version: MIN_API_VERSION,
            profile: Profile::Full,
            min_work_group_size: MIN_WORK_GROUP_SIZE,
            min_work_item_sizes: family.min_work_item_sizes(),
        }
    }

    /// Element-wise maximum of two requirements.
    pub fn combine(&self, other: &CapabilityRequirement) -> Self {
        let mut items = self.min_work_item_sizes;
        for (mine, theirs) in items.iter_mut().zip(other.min_work_item_sizes) {
            *mine = (*mine).max(theirs);
        }
        Self {
            name: format!("{}+{}", self.name, other.name),
            min_api_version: self.min_api_version.max(other.min_api_version),
            profile: Profile::Full,
            min_work_group_size: self.min_work_group_size.max(other.min_work_group_size),
            min_work_item_sizes: items,
        }
    }

    pub fn for_families(families: &[KernelFamily]) -> Self {
        let mut iter = families.iter().copied().map(Self::for_family);
        let first = iter
            .next()
            .unwrap_or_else(|| Self::for_family(KernelFamily::FlowUpdate));
        iter.fold(first, |acc, next| acc.combine(&next))
    }

    /// Requirement of the whole interpolation pipeline.
    pub fn pipeline() -> Self {
        let mut req = Self::for_families(&KernelFamily::ALL);
        req.name = "pipeline".to_string();
        req
    }
}

/// One failed admission predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "predicate", rename_all = "camelCase")]
pub enum Unmet {
    /// `found` is `None` when the version string could not be parsed.
    ApiVersion {
        found: Option<ApiVersion>,
        required: ApiVersion,
    },
    DeviceProfile { found: Profile },
    PlatformProfile { found: Profile },
    WorkGroupSize { found: usize, required: usize },
    WorkItemSize {
        dimension: usize,
        found: usize,
        required: usize,
    },
}

impl std::fmt::Display for Unmet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unmet::ApiVersion { found: Some(v), required } => write!(f, "api version {} < {}", v, required),
            Unmet::ApiVersion { found: None, required } => write!(f, "api version unreadable (need {})", required),
            Unmet::DeviceProfile { found } => write!(f, "device profile {}", found),
            Unmet::PlatformProfile { found } => write!(f, "platform profile {}", found),
            Unmet::WorkGroupSize { found, required } => write!(f, "work-group size {} < {}", found, required),
            Unmet::WorkItemSize {
                dimension,
                found,
                required,
            } => write!(f, "work-item size[{}] {} < {}", dimension, found, required),
        }
    }
}

/// Every predicate `device` fails against `req`; empty means admitted.
pub fn evaluate(device: &DeviceDescriptor, req: &CapabilityRequirement) -> Vec<Unmet> {
    let mut unmet = Vec::new();

    match device.parsed_api_version() {
        Some(v) if v >= req.min_api_version => {}
        found => unmet.push(Unmet::ApiVersion {
            found,
            required: req.min_api_version,
        }),
    }
    // Both must be full: an embedded platform taints every device on it
    if device.profile != req.profile {
        unmet.push(Unmet::DeviceProfile { found: device.profile });
    }
    if device.platform_profile != req.profile {
        unmet.push(Unmet::PlatformProfile {
            found: device.platform_profile,
        });
    }
    if device.max_work_group_size < req.min_work_group_size {
        unmet.push(Unmet::WorkGroupSize {
            found: device.max_work_group_size,
            required: req.min_work_group_size,
        });
    }
    for (dimension, (&found, &required)) in device
        .max_work_item_sizes
        .iter()
        .zip(&req.min_work_item_sizes)
        .enumerate()
    {
        if found < required {
            unmet.push(Unmet::WorkItemSize {
                dimension,
                found,
                required,
            });
        }
    }
    unmet
}

pub fn is_compatible(device: &DeviceDescriptor, req: &CapabilityRequirement) -> bool {
    evaluate(device, req).is_empty()
}

/// First device in enumeration order that passes the gate.
pub fn first_compatible<'a>(devices: &'a [DeviceDescriptor], req: &CapabilityRequirement) -> Option<&'a DeviceDescriptor> {
    devices.iter().find(|d| is_compatible(d, req))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::descriptor::Locator;

    fn device(index: usize) -> DeviceDescriptor {
        DeviceDescriptor {
            index,
            platform_name: "Test Platform".into(),
            platform_profile: Profile::Full,
            vendor_id: 0x10de,
            device_name: format!("gpu{}", index),
            driver_version: "1.0".into(),
            api_version: "OpenCL 1.2 CUDA".into(),
            profile: Profile::Full,
            max_work_group_size: 256,
            max_work_item_sizes: [256, 8, 1],
            locator: Locator::default(),
        }
    }

    #[test]
    fn pipeline_requirement_is_elementwise_max() {
        let req = CapabilityRequirement::pipeline();
        assert_eq!(req.min_work_item_sizes, [256, 8, 1]);
        assert_eq!(req.min_work_group_size, 256);
        assert_eq!(req.min_api_version, ApiVersion::new(1, 2));
        assert_eq!(req.profile, Profile::Full);
    }

    #[test]
    fn work_group_boundary_is_inclusive() {
        let req = CapabilityRequirement::pipeline();
        let mut d = device(0);
        d.max_work_group_size = req.min_work_group_size - 1;
        assert!(!is_compatible(&d, &req));
        d.max_work_group_size = req.min_work_group_size;
        assert!(is_compatible(&d, &req));
    }

    #[test]
    fn any_single_failed_predicate_rejects() {
        let req = CapabilityRequirement::pipeline();

        let mut old = device(0);
        old.api_version = "OpenCL 1.1 Mesa".into();
        assert_eq!(
            evaluate(&old, &req),
            vec![Unmet::ApiVersion {
                found: Some(ApiVersion::new(1, 1)),
                required: ApiVersion::new(1, 2)
            }]
        );

        let mut embedded_platform = device(0);
        embedded_platform.platform_profile = Profile::Embedded;
        assert!(!is_compatible(&embedded_platform, &req));

        let mut embedded_device = device(0);
        embedded_device.profile = Profile::Embedded;
        assert!(!is_compatible(&embedded_device, &req));

        let mut narrow = device(0);
        narrow.max_work_item_sizes = [256, 4, 1];
        assert_eq!(
            evaluate(&narrow, &req),
            vec![Unmet::WorkItemSize {
                dimension: 1,
                found: 4,
                required: 8
            }]
        );

        let mut garbled = device(0);
        garbled.api_version = "unknown".into();
        assert!(matches!(evaluate(&garbled, &req).as_slice(), [Unmet::ApiVersion { found: None, .. }]));
    }

    #[test]
    fn verdict_is_stable_across_calls() {
        let req = CapabilityRequirement::pipeline();
        let d = device(3);
        let first = is_compatible(&d, &req);
        for _ in 0..10 {
            assert_eq!(is_compatible(&d, &req), first);
        }
        assert!(first);
    }

    #[test]
    fn first_compatible_prefers_earlier_devices() {
        let req = CapabilityRequirement::pipeline();
        let mut weak = device(0);
        weak.max_work_group_size = 64;
        let devices = vec![weak, device(1), device(2)];
        assert_eq!(first_compatible(&devices, &req).map(|d| d.index), Some(1));
        assert!(first_compatible(&devices[..1], &req).is_none());
    }

    #[test]
    fn single_family_requirements_are_looser() {
        let update = CapabilityRequirement::for_family(KernelFamily::FlowUpdate);
        let mut d = device(0);
        d.max_work_item_sizes = [64, 8, 1];
        assert!(is_compatible(&d, &update));
        assert!(!is_compatible(&d, &CapabilityRequirement::pipeline()));
    }
}
