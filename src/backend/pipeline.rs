// Graphics pipeline creation
//
// The pipeline is completely fixed: hardcoded triangle in the vertex shader,
// no vertex buffers, viewport/scissor baked in from the swapchain extent.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::shader;
use super::VulkanDevice;

/// Render pass, layout and pipeline, destroyed together
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    device: Arc<VulkanDevice>,
}

impl GraphicsPipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        format: vk::Format,
        extent: vk::Extent2D,
        vert_path: &Path,
        frag_path: &Path,
    ) -> Result<Self> {
        log::info!("Creating graphics pipeline");

        let render_pass = create_render_pass(&device, format)?;

        let layout = match create_pipeline_layout(&device) {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.device.destroy_render_pass(render_pass, None) };
                return Err(e);
            }
        };

        // From here on Drop handles whatever got created
        let mut this = Self {
            pipeline: vk::Pipeline::null(),
            layout,
            render_pass,
            device,
        };

        let vert_shader = shader::load_shader_module(&this.device, vert_path)?;
        let frag_shader = match shader::load_shader_module(&this.device, frag_path) {
            Ok(module) => module,
            Err(e) => {
                unsafe { this.device.device.destroy_shader_module(vert_shader, None) };
                return Err(e);
            }
        };

        let result = create_graphics_pipeline(
            &this.device,
            this.render_pass,
            this.layout,
            extent,
            vert_shader,
            frag_shader,
        );

        // Modules are only needed while the pipeline is compiled
        unsafe {
            this.device.device.destroy_shader_module(frag_shader, None);
            this.device.device.destroy_shader_module(vert_shader, None);
        }

        this.pipeline = result?;

        log::info!("Graphics pipeline ready");
        Ok(this)
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.device.destroy_pipeline(self.pipeline, None);
            }
            self.device.device.destroy_pipeline_layout(self.layout, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Single color attachment, single subpass
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments);

    // Wait for the presentation engine to let go of the image
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe {
        device
            .device
            .create_render_pass(&render_pass_info, None)
            .context("Failed to create render pass")
    }
}

/// No descriptor sets, no push constants
pub fn create_pipeline_layout(device: &VulkanDevice) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default();

    unsafe {
        device
            .device
            .create_pipeline_layout(&layout_info, None)
            .context("Failed to create pipeline layout")
    }
}

pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_shader)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_shader)
            .name(c"main"),
    ];

    // Vertices come from the shader itself
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewports = [full_viewport(extent)];
    let scissors = [vk::Rect2D::default()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(extent)];
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Opaque: write every channel, no blending
    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(&color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)
            .context("Failed to create graphics pipeline")?
    };

    pipelines
        .into_iter()
        .next()
        .context("Driver returned no graphics pipeline")
}

/// Viewport covering the whole extent, depth 0..1
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport::default()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_extent() {
        let viewport = full_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });

        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (800.0, 600.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }
}
