// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (graphics + compute + present queue, API 1.2+)
// - Logical device + queue creation
// - Cached device properties for memory-type lookups

use super::error::{RendererError, Result, VkResultExt};
use super::instance::REQUIRED_API_VERSION;
use super::{Surface, VulkanInstance};
use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;
use std::fmt;
use std::sync::Arc;

/// One queue family as seen by the selector.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub supports_present: bool,
}

/// Everything the selector needs to know about a physical device.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub supports_swapchain: bool,
    pub queue_families: Vec<QueueFamilyInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ApiVersion(u32),
    MissingSwapchain,
    NoGraphicsComputeQueue,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiVersion(version) => write!(
                f,
                "device does not support Vulkan {}.{} (reports {}.{})",
                vk::api_version_major(REQUIRED_API_VERSION),
                vk::api_version_minor(REQUIRED_API_VERSION),
                vk::api_version_major(*version),
                vk::api_version_minor(*version),
            ),
            Self::MissingSwapchain => write!(f, "device does not support VK_KHR_swapchain"),
            Self::NoGraphicsComputeQueue => {
                write!(f, "device does not support graphic & compute queue families")
            }
        }
    }
}

impl DeviceCandidate {
    /// Index of the first queue family that can draw, compute and present.
    pub fn suitable_queue_family(&self) -> std::result::Result<u32, Rejection> {
        let version = (
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
        );
        let required = (
            vk::api_version_major(REQUIRED_API_VERSION),
            vk::api_version_minor(REQUIRED_API_VERSION),
        );
        if version < required {
            return Err(Rejection::ApiVersion(self.api_version));
        }
        if !self.supports_swapchain {
            return Err(Rejection::MissingSwapchain);
        }

        self.queue_families
            .iter()
            .position(|family| {
                family.queue_count > 0
                    && family.supports_present
                    && family
                        .flags
                        .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .map(|index| index as u32)
            .ok_or(Rejection::NoGraphicsComputeQueue)
    }

    fn score(&self) -> u32 {
        match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedDevice {
    pub index: usize,
    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,
}

/// Pick the best qualifying device; unsuitable ones are logged and skipped.
pub fn select_physical_device(candidates: &[DeviceCandidate]) -> Option<SelectedDevice> {
    let mut best: Option<(u32, SelectedDevice)> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let queue_family_index = match candidate.suitable_queue_family() {
            Ok(family) => family,
            Err(reason) => {
                log::warn!("failed to select {}: {}", candidate.name, reason);
                continue;
            }
        };

        let score = candidate.score();
        if best.map_or(true, |(best_score, _)| score > best_score) {
            best = Some((
                score,
                SelectedDevice {
                    index,
                    physical_device: candidate.handle,
                    queue_family_index,
                },
            ));
        }
    }

    best.map(|(_, selected)| selected)
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<VulkanInstance>,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,

    // Cached for memory-type lookups
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    pub fn new(instance: Arc<VulkanInstance>, surface: &Surface) -> Result<Arc<Self>> {
        let physical_devices = unsafe { instance.instance.enumerate_physical_devices() }
            .vk_call("vkEnumeratePhysicalDevices")?;

        if physical_devices.is_empty() {
            return Err(RendererError::EnvironmentUnsupported {
                reason: "no Vulkan-capable GPU found".into(),
            });
        }

        log::info!("Physical devices:");
        let candidates = physical_devices
            .iter()
            .map(|&device| Self::describe(&instance.instance, surface, device))
            .collect::<Result<Vec<_>>>()?;

        let selected = select_physical_device(&candidates).ok_or(RendererError::NoSuitableDevice {
            candidates: candidates.len(),
        })?;

        let (device, graphics_queue) =
            Self::create_logical_device(&instance.instance, selected.physical_device, selected.queue_family_index)?;

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(selected.physical_device)
        };
        let memory_properties = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(selected.physical_device)
        };

        log::info!("Selected GPU: {}", candidates[selected.index].name);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Arc::new(Self {
            device,
            physical_device: selected.physical_device,
            instance,
            graphics_queue,
            graphics_queue_family: selected.queue_family_index,
            memory_properties,
        }))
    }

    fn describe(
        instance: &ash::Instance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<DeviceCandidate> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .vk_call("vkEnumerateDeviceExtensionProperties")?;
        let extension_names: Vec<&CStr> = extensions
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();

        log::info!("\tname: {}", name);
        log::info!("\tdevice type: {:?}", props.device_type);
        log::info!(
            "\tapi version: {}.{}.{}",
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            vk::api_version_patch(props.api_version)
        );
        log::debug!("\textensions:");
        for ext in &extension_names {
            log::debug!("\t\t{}", ext.to_string_lossy());
        }

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) }
            .iter()
            .enumerate()
            .map(|(index, family)| -> Result<QueueFamilyInfo> {
                Ok(QueueFamilyInfo {
                    flags: family.queue_flags,
                    queue_count: family.queue_count,
                    supports_present: surface.supports_queue_family(device, index as u32)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DeviceCandidate {
            handle: device,
            name,
            device_type: props.device_type,
            api_version: props.api_version,
            supports_swapchain: extension_names.contains(&khr::Swapchain::name()),
            queue_families,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .vk_call("vkCreateDevice")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        log::info!("Logical device created (queue family {})", graphics_queue_family);
        Ok((device, graphics_queue))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.vk_call("vkDeviceWaitIdle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags, supports_present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo {
            flags,
            queue_count: 1,
            supports_present,
        }
    }

    fn candidate(raw: u64, api_version: u32, families: Vec<QueueFamilyInfo>) -> DeviceCandidate {
        DeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu-{raw}"),
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            api_version,
            supports_swapchain: true,
            queue_families: families,
        }
    }

    fn full() -> vk::QueueFlags {
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
    }

    #[test]
    fn graphics_only_device_is_rejected_and_scanning_continues() {
        let candidates = vec![
            candidate(1, vk::API_VERSION_1_2, vec![family(vk::QueueFlags::GRAPHICS, true)]),
            candidate(2, vk::API_VERSION_1_2, vec![family(vk::QueueFlags::COMPUTE, true)]),
            candidate(3, vk::API_VERSION_1_2, vec![family(full(), true)]),
        ];

        let selected = select_physical_device(&candidates).unwrap();
        assert_eq!(selected.index, 2);
        assert_eq!(selected.physical_device, vk::PhysicalDevice::from_raw(3));
        assert_eq!(selected.queue_family_index, 0);
    }

    #[test]
    fn old_api_version_is_rejected() {
        let old = candidate(1, vk::API_VERSION_1_1, vec![family(full(), true)]);
        assert_eq!(
            old.suitable_queue_family(),
            Err(Rejection::ApiVersion(vk::API_VERSION_1_1))
        );

        let candidates = vec![old, candidate(9, vk::API_VERSION_1_3, vec![family(full(), true)])];
        let selected = select_physical_device(&candidates).unwrap();
        assert_eq!(selected.index, 1);
        assert_eq!(selected.physical_device, vk::PhysicalDevice::from_raw(9));
    }

    #[test]
    fn queue_family_must_also_present() {
        let device = candidate(
            1,
            vk::API_VERSION_1_2,
            vec![family(full(), false), family(vk::QueueFlags::TRANSFER, true), family(full(), true)],
        );
        assert_eq!(device.suitable_queue_family(), Ok(2));
    }

    #[test]
    fn empty_queue_family_is_skipped() {
        let mut device = candidate(1, vk::API_VERSION_1_2, vec![family(full(), true)]);
        device.queue_families[0].queue_count = 0;
        assert_eq!(
            device.suitable_queue_family(),
            Err(Rejection::NoGraphicsComputeQueue)
        );
    }

    #[test]
    fn missing_swapchain_extension_is_rejected() {
        let mut device = candidate(1, vk::API_VERSION_1_2, vec![family(full(), true)]);
        device.supports_swapchain = false;
        assert_eq!(device.suitable_queue_family(), Err(Rejection::MissingSwapchain));
        assert!(select_physical_device(&[device]).is_none());
    }

    #[test]
    fn no_qualifying_device_yields_none() {
        let candidates = vec![
            candidate(1, vk::API_VERSION_1_0, vec![family(full(), true)]),
            candidate(2, vk::API_VERSION_1_2, vec![family(vk::QueueFlags::GRAPHICS, true)]),
        ];
        assert!(select_physical_device(&candidates).is_none());
    }

    #[test]
    fn discrete_gpu_wins_over_integrated() {
        let mut discrete = candidate(2, vk::API_VERSION_1_2, vec![family(full(), true)]);
        discrete.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        let candidates = vec![candidate(1, vk::API_VERSION_1_2, vec![family(full(), true)]), discrete];

        assert_eq!(select_physical_device(&candidates).unwrap().index, 1);
    }

    #[test]
    fn first_device_wins_a_tie() {
        let candidates = vec![
            candidate(1, vk::API_VERSION_1_2, vec![family(full(), true)]),
            candidate(2, vk::API_VERSION_1_2, vec![family(full(), true)]),
        ];
        assert_eq!(select_physical_device(&candidates).unwrap().index, 0);
    }
}
