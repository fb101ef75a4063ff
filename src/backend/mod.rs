// Backend module - Vulkan abstraction layer
//
// Design: Thin RAII wrappers around ash. Every wrapper holds an Arc to the
// object it was created from, so parents always outlive children.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::VulkanDevice;
pub use error::RendererError;
pub use instance::VulkanInstance;
pub use surface::Surface;
pub use swapchain::Swapchain;
