use std::mem;

use super::{camera::Camera, texture::DepthTexture};

use crate::cloud::PointCloud;

use log::warn;

use bytemuck::{Pod, Zeroable};
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, BlendState, Buffer, BufferAddress, BufferBindingType,
    BufferUsages, ColorTargetState, ColorWrites, CommandEncoder, CompareFunction, DepthBiasState,
    DepthStencilState, Device, FragmentState, FrontFace, LoadOp, MultisampleState, Operations,
    PipelineCompilationOptions, PipelineLayoutDescriptor, PolygonMode, PrimitiveState,
    PrimitiveTopology, Queue, RenderPassColorAttachment, RenderPassDepthStencilAttachment,
    RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, ShaderModuleDescriptor,
    ShaderSource, ShaderStages, StencilState, StoreOp, TextureFormat, TextureView,
    VertexAttribute, VertexBufferLayout, VertexFormat, VertexState, VertexStepMode,
};

#[repr(C)]
#[derive(Clone, Copy, Zeroable, Pod)]
struct Uniform {
    camera: [[f32; 4]; 4],
    resolution: [f32; 2],
    size: f32,
    _padding: u32,
}

impl Uniform {
    fn layout(device: &Device) -> BindGroupLayout {
        device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("uniform_bind_group_layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
struct Instance {
    model: [f32; 3],
}

impl Instance {
    fn layout() -> VertexBufferLayout<'static> {
        VertexBufferLayout {
            array_stride: mem::size_of::<Instance>() as BufferAddress,
            step_mode: VertexStepMode::Instance,
            attributes: &[VertexAttribute {
                format: VertexFormat::Float32x3,
                offset: 0,
                shader_location: 0,
            }],
        }
    }
}

/// GPU side of the displayed cloud: one instanced sprite per point.
pub struct PointCloudRenderer {
    uniform_buffer: Buffer,
    uniform_bind_group: BindGroup,
    instance_buffer: Buffer,
    instance_count: u32,
    pipeline: RenderPipeline,
}

impl PointCloudRenderer {
    pub fn new(device: &Device, color_format: TextureFormat) -> Self {
        let uniform_layout = Uniform::layout(device);

        let uniform_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("pointcloud_uniform_buffer"),
            contents: bytemuck::cast_slice(&[Uniform::zeroed()]),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        let uniform_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("pointcloud_uniform_bind_group"),
            layout: &uniform_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let instance_buffer = Self::create_instance_buffer(device, &[]);

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("pointcloud_shader"),
            source: ShaderSource::Wgsl(include_str!("shaders/pointcloud.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("pointcloud_pipeline_layout"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("pointcloud_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader,
                compilation_options: PipelineCompilationOptions::default(),
                entry_point: "vs_main",
                buffers: &[Instance::layout()],
            },
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: Some(DepthStencilState {
                format: DepthTexture::FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: "fs_main",
                compilation_options: PipelineCompilationOptions::default(),
                targets: &[Some(ColorTargetState {
                    format: color_format,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        Self {
            uniform_buffer,
            uniform_bind_group,
            instance_buffer,
            instance_count: 0,
            pipeline,
        }
    }

    /// Replaces the GPU copy with `cloud`, fitted into a unit cube. Clouds
    /// larger than the device's buffer limit are evenly subsampled.
    pub fn upload(&mut self, device: &Device, cloud: &PointCloud) {
        let instances = to_instances(cloud);
        let total = instances.len();

        let instances = fit_to_budget(instances, device.limits().max_buffer_size);
        if instances.len() < total {
            warn!(
                "cloud exceeds the GPU buffer limit, drawing {} of {} points",
                instances.len(),
                total
            );
        }

        self.instance_buffer = Self::create_instance_buffer(device, &instances);
        self.instance_count = u32::try_from(instances.len()).unwrap_or(u32::MAX);
    }

    pub fn update(&self, camera: &Camera, queue: &Queue, resolution: [f32; 2], point_size: f32) {
        let uniform = Uniform {
            camera: camera.get_view_proj(),
            resolution,
            size: point_size,
            _padding: 0,
        };

        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniform]));
    }

    pub fn draw(
        &self,
        encoder: &mut CommandEncoder,
        view: &TextureView,
        depth_texture: &DepthTexture,
    ) {
        if self.instance_count == 0 {
            return;
        }

        let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("pointcloud_render_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: depth_texture.view(),
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0),
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.instance_buffer.slice(..));
        render_pass.draw(0..6, 0..self.instance_count);
    }

    fn create_instance_buffer(device: &Device, instances: &[Instance]) -> Buffer {
        // zero sized vertex buffers can't be bound
        let placeholder = [0u8; mem::size_of::<Instance>()];
        let contents: &[u8] = if instances.is_empty() {
            &placeholder
        } else {
            bytemuck::cast_slice(instances)
        };

        device.create_buffer_init(&BufferInitDescriptor {
            label: Some("pointcloud_instance_buffer"),
            contents,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
        })
    }
}

/// Centers the finite points on their bounding box and scales the longest
/// side to 1.
fn to_instances(cloud: &PointCloud) -> Vec<Instance> {
    let Some(bounds) = cloud.bounds() else {
        return Vec::new();
    };

    let center = bounds.center();
    let extent = bounds.extent();
    let scale = if extent > 0.0 { 1.0 / extent } else { 1.0 };

    cloud
        .points()
        .iter()
        .map(|p| [p.x, p.y, p.z])
        .filter(|p| p.iter().all(|v| v.is_finite()))
        .map(|p| Instance {
            model: [
                (p[0] - center[0]) * scale,
                (p[1] - center[1]) * scale,
                (p[2] - center[2]) * scale,
            ],
        })
        .collect()
}

/// Keeps every n-th instance so the buffer fits in `max_bytes` and the count
/// fits in a `u32` draw range.
fn fit_to_budget(instances: Vec<Instance>, max_bytes: u64) -> Vec<Instance> {
    let per_instance = mem::size_of::<Instance>() as u64;
    let max_count = (max_bytes / per_instance).min(u32::MAX as u64) as usize;

    if instances.len() <= max_count {
        return instances;
    }
    if max_count == 0 {
        return Vec::new();
    }

    let step = instances.len().div_ceil(max_count);

    instances.into_iter().step_by(step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::PointXYZ;

    #[test]
    fn empty_cloud_has_no_instances() {
        assert!(to_instances(&PointCloud::new()).is_empty());
    }

    #[test]
    fn instances_fit_in_unit_cube() {
        let mut cloud = PointCloud::new();
        cloud.extend([
            PointXYZ::new(10.0, 0.0, 0.0),
            PointXYZ::new(14.0, 2.0, 1.0),
            PointXYZ::new(f32::INFINITY, 0.0, 0.0),
        ]);

        let instances = to_instances(&cloud);

        assert_eq!(
            instances,
            vec![
                Instance {
                    model: [-0.5, -0.25, -0.125]
                },
                Instance {
                    model: [0.5, 0.25, 0.125]
                },
            ]
        );
    }

    fn instances(n: usize) -> Vec<Instance> {
        (0..n)
            .map(|i| Instance {
                model: [i as f32, 0.0, 0.0],
            })
            .collect()
    }

    #[test]
    fn small_clouds_are_uploaded_whole() {
        let budget = 10 * mem::size_of::<Instance>() as u64;

        assert_eq!(fit_to_budget(instances(10), budget), instances(10));
    }

    #[test]
    fn oversized_clouds_are_subsampled_within_budget() {
        let budget = 10 * mem::size_of::<Instance>() as u64 + 5;

        let kept = fit_to_budget(instances(25), budget);

        assert!(kept.len() as u64 * mem::size_of::<Instance>() as u64 <= budget);
        let xs: Vec<f32> = kept.iter().map(|i| i.model[0]).collect();
        assert_eq!(xs, vec![0.0, 3.0, 6.0, 9.0, 12.0, 15.0, 18.0, 21.0, 24.0]);
    }

    #[test]
    fn single_point_lands_on_origin() {
        let mut cloud = PointCloud::new();
        cloud.push(PointXYZ::new(3.0, -4.0, 5.0));

        assert_eq!(
            to_instances(&cloud),
            vec![Instance {
                model: [0.0, 0.0, 0.0]
            }]
        );
    }
}
