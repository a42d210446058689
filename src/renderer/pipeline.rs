use gfx_hal::{format as f, pass::Subpass, prelude::*, pso, Backend};
use std::iter;
use std::mem::ManuallyDrop;
use std::ops::Range;
use std::ptr;

use crate::platform::{
    AttribFormat, Attribute, FetchShader, PixelShader, PrimitiveMode, VertexShader,
};

const ENTRY_NAME: &str = "main";

/// Everything a cached pipeline was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineKey {
    pub fetch: FetchShader,
    pub vertex: VertexShader,
    pub pixel: PixelShader,
    pub mode: PrimitiveMode,
    /// `(binding, stride)` of every stream the fetch shader reads.
    pub strides: Vec<(u32, u32)>,
}

pub struct Pipeline<'a, B: Backend> {
    device: &'a B::Device,
    pub pipeline: ManuallyDrop<B::GraphicsPipeline>,
    pub pipeline_layout: ManuallyDrop<B::PipelineLayout>,
}

impl<'a, B: Backend> Pipeline<'a, B> {
    pub fn new(
        device: &'a B::Device,
        vs_module: &B::ShaderModule,
        fs_module: &B::ShaderModule,
        render_pass: &B::RenderPass,
        attributes: &[Attribute],
        key: &PipelineKey,
    ) -> Self {
        let pipeline_layout = ManuallyDrop::new(
            unsafe {
                device.create_pipeline_layout(
                    iter::empty::<B::DescriptorSetLayout>(),
                    iter::empty::<(pso::ShaderStageFlags, Range<u32>)>(),
                )
            }
            .expect("Can't create pipeline layout"),
        );

        let (vs_entry, fs_entry) = (
            pso::EntryPoint {
                entry: ENTRY_NAME,
                module: vs_module,
                specialization: pso::Specialization::default(),
            },
            pso::EntryPoint {
                entry: ENTRY_NAME,
                module: fs_module,
                specialization: pso::Specialization::default(),
            },
        );

        let shader_entries = pso::GraphicsShaderSet {
            vertex: vs_entry,
            hull: None,
            domain: None,
            geometry: None,
            fragment: Some(fs_entry),
        };

        let subpass = Subpass {
            index: 0,
            main_pass: render_pass,
        };

        let mut pipeline_desc = pso::GraphicsPipelineDesc::new(
            shader_entries,
            primitive(key.mode),
            pso::Rasterizer::FILL,
            &*pipeline_layout,
            subpass,
        );
        pipeline_desc.blender.targets.push(pso::ColorBlendDesc {
            mask: pso::ColorMask::ALL,
            blend: Some(pso::BlendState::ALPHA),
        });

        for &(binding, stride) in &key.strides {
            pipeline_desc.vertex_buffers.push(pso::VertexBufferDesc {
                binding,
                stride,
                rate: pso::VertexInputRate::Vertex,
            });
        }

        for attribute in attributes {
            pipeline_desc.attributes.push(pso::AttributeDesc {
                location: attribute.location,
                binding: attribute.buffer,
                element: pso::Element {
                    format: format(attribute.format),
                    offset: attribute.offset,
                },
            });
        }

        let graphic_pipeline = unsafe { device.create_graphics_pipeline(&pipeline_desc, None) }
            .expect("Can't create graphics pipeline");

        Pipeline {
            device,
            pipeline: ManuallyDrop::new(graphic_pipeline),
            pipeline_layout,
        }
    }
}

/// Stream bindings an attribute list reads from, ascending and deduplicated.
pub fn bindings(attributes: &[Attribute]) -> Vec<u32> {
    let mut bindings: Vec<u32> = attributes.iter().map(|a| a.buffer).collect();
    bindings.sort_unstable();
    bindings.dedup();
    bindings
}

fn primitive(mode: PrimitiveMode) -> pso::Primitive {
    match mode {
        PrimitiveMode::Triangles => pso::Primitive::TriangleList,
        PrimitiveMode::TriangleStrip => pso::Primitive::TriangleStrip,
    }
}

fn format(format: AttribFormat) -> f::Format {
    match format {
        AttribFormat::Float32 => f::Format::R32Sfloat,
        AttribFormat::Float32x2 => f::Format::Rg32Sfloat,
        AttribFormat::Float32x3 => f::Format::Rgb32Sfloat,
        AttribFormat::Float32x4 => f::Format::Rgba32Sfloat,
    }
}

impl<'a, B: Backend> Drop for Pipeline<'a, B> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_graphics_pipeline(ManuallyDrop::into_inner(ptr::read(&self.pipeline)));
            self.device
                .destroy_pipeline_layout(ManuallyDrop::into_inner(ptr::read(
                    &self.pipeline_layout,
                )));
        }
    }
}
