// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, blending. There is no
// depth attachment; every scene is flat.

use super::error::{RendererError, Result, VkResultExt};
use super::shader::ShaderModule;
use super::VulkanDevice;
use ash::vk;
use std::sync::Arc;

/// Render pass with a single color attachment that is cleared, stored and
/// handed to the presentation engine.
pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    device: Arc<VulkanDevice>,
}

impl RenderPass {
    pub fn new(device: Arc<VulkanDevice>, format: vk::Format) -> Result<Self> {
        // Previous contents are discarded, so the image may start in any layout
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_attachments = &[color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments)
            .build();

        // Layout transition waits for the acquire semaphore's stage
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = &[color_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .vk_call("vkCreateRenderPass")?;

        Ok(Self { render_pass, device })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// One interleaved vertex binding.
#[derive(Debug, Clone)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    /// `(format, offset)` per location, in location order, all on binding 0.
    pub fn new(stride: usize, attributes: &[(vk::Format, usize)]) -> Self {
        Self {
            stride: stride as u32,
            attributes: attributes
                .iter()
                .enumerate()
                .map(|(location, &(format, offset))| vk::VertexInputAttributeDescription {
                    location: location as u32,
                    binding: 0,
                    format,
                    offset: offset as u32,
                })
                .collect(),
        }
    }

    fn binding(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }
}

/// Where viewport and scissor come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportMode {
    /// Set with vkCmdSetViewport/vkCmdSetScissor every frame.
    Dynamic,
    /// Baked in; the pipeline must be rebuilt when the extent changes.
    Fixed(vk::Extent2D),
}

pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

/// Viewport mode to rebuild with, `None` when the pipeline still matches.
pub fn rebuild_target(
    current_pass: vk::RenderPass,
    current_mode: ViewportMode,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Option<ViewportMode> {
    let mode = match current_mode {
        ViewportMode::Fixed(_) => ViewportMode::Fixed(extent),
        ViewportMode::Dynamic => ViewportMode::Dynamic,
    };
    (current_pass != render_pass || mode != current_mode).then_some(mode)
}

pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub viewport_mode: ViewportMode,
    render_pass: vk::RenderPass,
    vertex_layout: VertexLayout,
    vertex_shader: ShaderModule,
    fragment_shader: ShaderModule,
    device: Arc<VulkanDevice>,
}

impl GraphicsPipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        render_pass: &RenderPass,
        vertex_shader: ShaderModule,
        fragment_shader: ShaderModule,
        vertex_layout: VertexLayout,
        set_layouts: &[vk::DescriptorSetLayout],
        viewport_mode: ViewportMode,
    ) -> Result<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .vk_call("vkCreatePipelineLayout")?;

        let mut this = Self {
            pipeline: vk::Pipeline::null(),
            layout,
            viewport_mode,
            render_pass: render_pass.render_pass,
            vertex_layout,
            vertex_shader,
            fragment_shader,
            device,
        };
        this.pipeline = this.build_pipeline(this.render_pass, viewport_mode)?;

        log::debug!("Created graphics pipeline ({:?} viewport)", viewport_mode);
        Ok(this)
    }

    /// Rebuild if the render pass or a baked-in extent changed.
    ///
    /// The caller must make sure no frame in flight still uses the old pipeline.
    pub fn retarget(&mut self, render_pass: &RenderPass, extent: vk::Extent2D) -> Result<()> {
        let Some(viewport_mode) =
            rebuild_target(self.render_pass, self.viewport_mode, render_pass.render_pass, extent)
        else {
            return Ok(());
        };

        // On failure the old pipeline and its targets stay as they were
        let pipeline = self.build_pipeline(render_pass.render_pass, viewport_mode)?;
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
        }
        self.pipeline = pipeline;
        self.render_pass = render_pass.render_pass;
        self.viewport_mode = viewport_mode;
        log::debug!("Rebuilt graphics pipeline for {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Bind the pipeline and, for dynamic mode, cover `extent`.
    pub fn bind(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let device = &self.device.device;
        unsafe {
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            if self.viewport_mode == ViewportMode::Dynamic {
                let (viewport, scissor) = full_viewport(extent);
                device.cmd_set_viewport(command_buffer, 0, &[viewport]);
                device.cmd_set_scissor(command_buffer, 0, &[scissor]);
            }
        }
    }

    fn build_pipeline(
        &self,
        render_pass: vk::RenderPass,
        viewport_mode: ViewportMode,
    ) -> Result<vk::Pipeline> {
        let entry_point = c"main";

        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(self.vertex_shader.module)
            .name(entry_point)
            .build();

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(self.fragment_shader.module)
            .name(entry_point)
            .build();

        let shader_stages = &[vert_stage, frag_stage];

        // Vertex input
        let bindings = [self.vertex_layout.binding()];
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&self.vertex_layout.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor
        let (viewports, scissors) = match viewport_mode {
            ViewportMode::Dynamic => (Vec::new(), Vec::new()),
            ViewportMode::Fixed(extent) => {
                let (viewport, scissor) = full_viewport(extent);
                (vec![viewport], vec![scissor])
            }
        };
        let mut viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors)
            .build();
        // Dynamic state still needs the counts, with null arrays
        viewport_state.viewport_count = 1;
        viewport_state.scissor_count = 1;

        let dynamic_states = match viewport_mode {
            ViewportMode::Dynamic => vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            ViewportMode::Fixed(_) => Vec::new(),
        };
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // Rasterization
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        // Multisampling (disabled)
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Color blending (no blending, opaque)
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| RendererError::from_vk("vkCreateGraphicsPipelines", e))?;

        Ok(pipelines[0])
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_get_sequential_locations() {
        let layout = VertexLayout::new(
            20,
            &[(vk::Format::R32G32_SFLOAT, 0), (vk::Format::R32G32B32_SFLOAT, 8)],
        );
        assert_eq!(layout.stride, 20);
        assert_eq!(layout.attributes.len(), 2);
        assert_eq!(layout.attributes[1].location, 1);
        assert_eq!(layout.attributes[1].offset, 8);
        assert!(layout.attributes.iter().all(|a| a.binding == 0));
    }

    #[test]
    fn full_viewport_covers_the_extent() {
        let (viewport, scissor) = full_viewport(vk::Extent2D {
            width: 1200,
            height: 400,
        });
        assert_eq!((viewport.width, viewport.height), (1200.0, 400.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!(scissor.extent.width, 1200);
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
    }

    #[test]
    fn rebuild_only_when_pass_or_baked_extent_changes() {
        use ash::vk::Handle;
        let pass = vk::RenderPass::from_raw(1);
        let other_pass = vk::RenderPass::from_raw(2);
        let small = vk::Extent2D { width: 640, height: 480 };
        let large = vk::Extent2D { width: 1200, height: 400 };

        assert_eq!(rebuild_target(pass, ViewportMode::Fixed(small), pass, small), None);
        assert_eq!(
            rebuild_target(pass, ViewportMode::Fixed(small), pass, large),
            Some(ViewportMode::Fixed(large))
        );
        assert_eq!(rebuild_target(pass, ViewportMode::Dynamic, pass, large), None);
        assert_eq!(
            rebuild_target(pass, ViewportMode::Dynamic, other_pass, large),
            Some(ViewportMode::Dynamic)
        );
        assert_eq!(
            rebuild_target(pass, ViewportMode::Fixed(small), other_pass, small),
            Some(ViewportMode::Fixed(small))
        );
    }
}
