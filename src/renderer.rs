// Renderer - owns every Vulkan object and runs the per-frame cycle
//
// FRAME TIMELINE (one slot of the ring):
//   wait fence -> acquire image -> record -> reset fence + submit -> present -> advance
//
// The fence wait and the acquire are bounded, so a stuck GPU or compositor
// hands control back to the event loop instead of hanging it.

use crate::backend::buffer::Buffer;
use crate::backend::command::CommandPool;
use crate::backend::descriptor::TextureBinding;
use crate::backend::error::{Result, VkResultExt};
use crate::backend::frame::{FrameResources, FrameRing};
pub use crate::backend::frame::FrameOutcome;
use crate::backend::pipeline::{GraphicsPipeline, RenderPass, ViewportMode};
use crate::backend::shader::ShaderModule;
use crate::backend::swapchain::AcquireOutcome;
use crate::backend::sync::FenceStatus;
use crate::backend::texture::Texture;
use crate::backend::{Surface, Swapchain, VulkanDevice, VulkanInstance};
use crate::config::Config;
use crate::scene::Scene;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::Duration;

fn as_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Main renderer holding all Vulkan resources.
///
/// IMPORTANT: Field order matters for Drop! Fields drop top to bottom, so
/// objects are listed in reverse order of creation.
pub struct Renderer {
    frames: FrameRing<FrameResources>,
    pipeline: Option<GraphicsPipeline>,
    texture_binding: Option<TextureBinding>,
    // Sampled through texture_binding; never touched directly
    _texture: Option<Texture>,
    vertex_buffer: Option<Buffer>,
    // Frees the frames' command buffers when dropped
    _command_pool: CommandPool,
    render_pass: RenderPass,
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
    surface: Surface,

    scene: Scene,
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    fence_timeout_ns: u64,
    acquire_timeout_ns: u64,
    /// Set when acquire or present reported the swapchain out of date or suboptimal
    swapchain_stale: bool,
}

impl Renderer {
    /// Initialize all Vulkan resources for `window`.
    ///
    /// Creation order: instance, surface, device, swapchain, render pass,
    /// command pool, frame slots, scene resources, pipeline.
    pub fn new<W>(window: &W, width: u32, height: u32, config: &Config) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Initializing Vulkan...");

        let instance = VulkanInstance::new(
            &config.window.title,
            config.validation_enabled(),
            window.raw_display_handle(),
        )?;
        let surface = Surface::new(instance.clone(), window)?;
        let device = VulkanDevice::new(instance, &surface)?;

        let present_mode = config.present_mode();
        let swapchain = Swapchain::new(device.clone(), &surface, present_mode, width, height, None)?;
        log::info!("Presenting with {:?}", swapchain.present_mode);
        let render_pass = RenderPass::new(device.clone(), swapchain.format)?;
        let command_pool = CommandPool::new(device.clone())?;

        let frame_count = config.frames_in_flight();
        let frames = command_pool
            .allocate(frame_count as u32)?
            .into_iter()
            .map(|command_buffer| FrameResources::new(device.clone(), command_buffer))
            .collect::<Result<Vec<_>>>()?;
        let frames = FrameRing::new(frames);
        log::info!("{} frames in flight", frames.len());

        let scene = config.graphics.scene;
        log::info!("Scene: {:?}", scene);

        let vertex_buffer = if scene.vertex_count() > 0 {
            Some(Buffer::vertex_buffer(
                device.clone(),
                &command_pool,
                scene.vertex_bytes(),
            )?)
        } else {
            None
        };

        let texture = if scene.uses_texture() {
            Some(Texture::from_file(device.clone(), &command_pool, &config.assets.texture)?)
        } else {
            None
        };
        let texture_binding = texture
            .as_ref()
            .map(|texture| TextureBinding::new(device.clone(), texture))
            .transpose()?;

        let pipeline = match (config.shader_paths(), scene.vertex_layout()) {
            (Some((vert_path, frag_path)), Some(vertex_layout)) => {
                let vertex_shader = ShaderModule::from_file(device.clone(), &vert_path)?;
                let fragment_shader = ShaderModule::from_file(device.clone(), &frag_path)?;
                let set_layouts: Vec<_> = texture_binding.iter().map(|binding| binding.layout).collect();
                let viewport_mode = if config.graphics.dynamic_viewport {
                    ViewportMode::Dynamic
                } else {
                    ViewportMode::Fixed(swapchain.extent)
                };

                Some(GraphicsPipeline::new(
                    device.clone(),
                    &render_pass,
                    vertex_shader,
                    fragment_shader,
                    vertex_layout,
                    &set_layouts,
                    viewport_mode,
                )?)
            }
            _ => None,
        };

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            frames,
            pipeline,
            texture_binding,
            _texture: texture,
            vertex_buffer,
            _command_pool: command_pool,
            render_pass,
            swapchain,
            device,
            surface,
            scene,
            clear_color: config.graphics.clear_color,
            present_mode,
            fence_timeout_ns: as_nanos(config.fence_timeout()),
            acquire_timeout_ns: as_nanos(config.acquire_timeout()),
            swapchain_stale: false,
        })
    }

    pub fn is_swapchain_stale(&self) -> bool {
        self.swapchain_stale
    }

    /// Render and present a single frame.
    pub fn draw_frame(&mut self) -> Result<FrameOutcome> {
        // STEP 1: Wait until the GPU is done with this slot
        if self.frames.current().sync.wait(self.fence_timeout_ns)? == FenceStatus::TimedOut {
            log::warn!(
                "frame {} still in flight after {} ms",
                self.frames.current_index(),
                self.fence_timeout_ns / 1_000_000
            );
            return Ok(self.finish(FrameOutcome::FenceTimeout));
        }
        self.frames.mark_idle();

        // STEP 2: Acquire next swapchain image
        let image_available = self.frames.current().sync.image_available;
        let image_index = match self
            .swapchain
            .acquire_next_image(self.acquire_timeout_ns, image_available)?
        {
            AcquireOutcome::Ready { index, suboptimal } => {
                // Still usable this frame, recreate afterwards
                if suboptimal {
                    self.swapchain_stale = true;
                }
                index
            }
            AcquireOutcome::OutOfDate => {
                self.swapchain_stale = true;
                return Ok(self.finish(FrameOutcome::SwapchainOutOfDate));
            }
            AcquireOutcome::NotReady => {
                log::warn!("no swapchain image available within the acquire timeout");
                return Ok(self.finish(FrameOutcome::AcquireTimeout));
            }
        };

        // STEP 3: Record
        let frame = self.frames.begin_recording();
        let recorded = frame
            .rebuild_framebuffer(
                self.render_pass.render_pass,
                self.swapchain.image_views[image_index as usize],
                self.swapchain.extent,
            )
            .and_then(|()| self.record_commands(self.frames.current()));
        if let Err(e) = recorded {
            self.frames.abort_recording();
            return Err(e);
        }

        // STEP 4: Submit
        let render_finished = self.swapchain.render_finished(image_index);
        if let Err(e) = self.submit(self.frames.current(), render_finished) {
            self.frames.abort_recording();
            return Err(e);
        }
        self.frames.mark_submitted();

        // STEP 5: Present
        let presented = self
            .swapchain
            .present(self.device.graphics_queue, image_index, &[render_finished]);

        // STEP 6: Advance to next slot
        let outcome = self.finish(FrameOutcome::Presented);

        if presented?.needs_recreate() {
            self.swapchain_stale = true;
        }
        Ok(outcome)
    }

    fn finish(&mut self, outcome: FrameOutcome) -> FrameOutcome {
        self.frames.settle(outcome);
        outcome
    }

    fn record_commands(&self, frame: &FrameResources) -> Result<()> {
        let device = &self.device.device;
        let command_buffer = frame.command_buffer;
        let extent = self.swapchain.extent;

        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .vk_call("vkResetCommandBuffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .vk_call("vkBeginCommandBuffer")?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            }];
            let render_pass_begin = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass.render_pass)
                .framebuffer(frame.framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(command_buffer, &render_pass_begin, vk::SubpassContents::INLINE);

            if let Some(pipeline) = &self.pipeline {
                pipeline.bind(command_buffer, extent);

                if let Some(binding) = &self.texture_binding {
                    device.cmd_bind_descriptor_sets(
                        command_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        pipeline.layout,
                        0,
                        &[binding.set],
                        &[],
                    );
                }
                if let Some(vertex_buffer) = &self.vertex_buffer {
                    device.cmd_bind_vertex_buffers(command_buffer, 0, &[vertex_buffer.buffer], &[0]);
                }
                device.cmd_draw(command_buffer, self.scene.vertex_count(), 1, 0, 0);
            }

            device.cmd_end_render_pass(command_buffer);
            device
                .end_command_buffer(command_buffer)
                .vk_call("vkEndCommandBuffer")
        }
    }

    fn submit(&self, frame: &FrameResources, render_finished: vk::Semaphore) -> Result<()> {
        // Unsignaled only when a submission that signals it follows
        assert!(
            self.frames.fence_reset_allowed(),
            "frame {} fence reset outside recording",
            self.frames.current_index()
        );
        frame.sync.reset()?;

        let wait_semaphores = [frame.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [frame.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                frame.sync.in_flight_fence,
            )
        }
        .vk_call("vkQueueSubmit")
    }

    /// Recreate swapchain after window resize.
    ///
    /// Waits for the device, so every frame slot is idle afterwards.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.device.wait_idle()?;
        self.frames.mark_all_idle();
        for frame in self.frames.iter_mut() {
            frame.destroy_framebuffer();
        }

        let swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            self.present_mode,
            width,
            height,
            Some(&self.swapchain),
        )?;
        // The current render pass stays alive until the pipeline points elsewhere
        let render_pass = if swapchain.format != self.swapchain.format {
            Some(RenderPass::new(self.device.clone(), swapchain.format)?)
        } else {
            None
        };
        if let Some(pipeline) = &mut self.pipeline {
            pipeline.retarget(render_pass.as_ref().unwrap_or(&self.render_pass), swapchain.extent)?;
        }

        self.swapchain = swapchain;
        if let Some(render_pass) = render_pass {
            self.render_pass = render_pass;
        }

        self.swapchain_stale = false;
        log::info!(
            "Recreated swapchain: {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );
        Ok(())
    }

    /// Wait for device to be idle (e.g., before exit)
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Destroying renderer...");
        // Fields are released right after this; nothing may still be executing
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_convert_to_nanoseconds() {
        assert_eq!(as_nanos(Duration::from_millis(1000)), 1_000_000_000);
        assert_eq!(as_nanos(Duration::MAX), u64::MAX);
    }
}
