// Renderer error taxonomy
//
// Every Vulkan failure is classified into one of a handful of categories so
// main can turn unrecoverable ones into distinct process exit codes.

use ash::prelude::VkResult;
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("environment unsupported: {reason}")]
    EnvironmentUnsupported { reason: String },

    #[error("no suitable GPU found among {candidates} physical devices")]
    NoSuitableDevice { candidates: usize },

    #[error("resource allocation failed in {call}: {result}")]
    ResourceAllocation { call: &'static str, result: vk::Result },

    #[error("no memory type matches filter {type_filter:#034b} with {flags:?}")]
    NoMemoryType {
        type_filter: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("presentation surface is out of date")]
    SurfaceOutOfDate,

    #[error("failed to load {}: {reason}", path.display())]
    AssetLoad { path: PathBuf, reason: String },

    #[error("{call} failed: {result}")]
    Vulkan { call: &'static str, result: vk::Result },
}

pub type Result<T> = std::result::Result<T, RendererError>;

impl RendererError {
    /// Classify a raw Vulkan result returned by `call`.
    pub fn from_vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceOutOfDate,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_TOO_MANY_OBJECTS
            | vk::Result::ERROR_FRAGMENTED_POOL
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY => Self::ResourceAllocation { call, result },
            vk::Result::ERROR_INCOMPATIBLE_DRIVER
            | vk::Result::ERROR_INITIALIZATION_FAILED
            | vk::Result::ERROR_EXTENSION_NOT_PRESENT
            | vk::Result::ERROR_LAYER_NOT_PRESENT
            | vk::Result::ERROR_FEATURE_NOT_PRESENT => Self::EnvironmentUnsupported {
                reason: format!("{call} failed: {result}"),
            },
            _ => Self::Vulkan { call, result },
        }
    }

    pub fn asset(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::AssetLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Process exit code for this failure category.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Vulkan { .. } => 1,
            Self::EnvironmentUnsupported { .. } => 2,
            Self::NoSuitableDevice { .. } => 3,
            Self::ResourceAllocation { .. } | Self::NoMemoryType { .. } => 4,
            Self::SurfaceOutOfDate => 5,
            Self::AssetLoad { .. } => 6,
        }
    }
}

impl From<ash::LoadingError> for RendererError {
    fn from(err: ash::LoadingError) -> Self {
        Self::EnvironmentUnsupported {
            reason: format!("failed to load the Vulkan library ({err}). Is Vulkan installed?"),
        }
    }
}

/// `.vk_call("vkCreateX")` on a `VkResult`, the typed counterpart of anyhow's `.context()`.
pub trait VkResultExt<T> {
    fn vk_call(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn vk_call(self, call: &'static str) -> Result<T> {
        self.map_err(|result| RendererError::from_vk(call, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_maps_to_surface_out_of_date() {
        let err = RendererError::from_vk("vkQueuePresentKHR", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(err, RendererError::SurfaceOutOfDate));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn memory_exhaustion_is_an_allocation_failure() {
        for result in [
            vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY,
        ] {
            let err = RendererError::from_vk("vkAllocateMemory", result);
            assert!(matches!(err, RendererError::ResourceAllocation { .. }), "{result:?}");
            assert_eq!(err.exit_code(), 4);
        }
    }

    #[test]
    fn missing_driver_support_is_environment_failure() {
        let err = RendererError::from_vk("vkCreateInstance", vk::Result::ERROR_INCOMPATIBLE_DRIVER);
        assert!(matches!(err, RendererError::EnvironmentUnsupported { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn unclassified_results_keep_the_call_name() {
        let err = RendererError::from_vk("vkQueueSubmit", vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("vkQueueSubmit"));
    }

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let errors = [
            RendererError::Vulkan {
                call: "x",
                result: vk::Result::ERROR_UNKNOWN,
            },
            RendererError::EnvironmentUnsupported { reason: "x".into() },
            RendererError::NoSuitableDevice { candidates: 2 },
            RendererError::NoMemoryType {
                type_filter: 0b101,
                flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            },
            RendererError::SurfaceOutOfDate,
            RendererError::asset("shaders/quad.vert.spv", "not found"),
        ];
        let mut codes: Vec<u8> = errors.iter().map(RendererError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|&code| code != 0));
    }

    #[test]
    fn vk_call_wraps_errors_and_passes_values() {
        let ok: VkResult<u32> = Ok(7);
        assert_eq!(ok.vk_call("vkGetSomething").ok(), Some(7));

        let failed: VkResult<u32> = Err(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(
            failed.vk_call("vkGetSomething"),
            Err(RendererError::Vulkan {
                call: "vkGetSomething",
                ..
            })
        ));
    }
}
