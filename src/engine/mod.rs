mod camera;
mod gui;
mod pointcloud;
mod texture;

use std::sync::Arc;

use anyhow::{Context, Result};
use camera::Camera;
use egui_wgpu::ScreenDescriptor;
use gui::{layout, EguiRender, Overlay};
use log::info;
use pointcloud::PointCloudRenderer;
use texture::DepthTexture;
use wgpu::{
    Color, CommandEncoderDescriptor, Device, DeviceDescriptor, Features, Instance,
    InstanceDescriptor, LoadOp, Operations, PowerPreference, PresentMode, Queue,
    RenderPassColorAttachment, RenderPassDescriptor, RequestAdapterOptions, StoreOp, Surface,
    SurfaceConfiguration, SurfaceError, TextureUsages, TextureViewDescriptor,
};
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use crate::{cloud::PointCloud, config::ViewerConfig, shell::LoadReport};

const POINT_SIZE_STEP: f32 = 0.5;

pub struct Engine {
    size: PhysicalSize<u32>,
    surface: Surface<'static>,
    config: SurfaceConfiguration,
    device: Device,
    queue: Queue,
    depth_texture: DepthTexture,
    gui: EguiRender,
    overlay: Overlay,
    window: Arc<Window>,
    camera: Camera,
    pointcloud: PointCloudRenderer,
}

impl Engine {
    pub async fn new(window: Arc<Window>, viewer_config: &ViewerConfig) -> Result<Self> {
        let size = window.inner_size();

        let instance = Instance::new(InstanceDescriptor::default());

        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no compatible graphics adapter")?;

        info!("rendering with {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: None,
                    required_features: Features::empty(),
                    required_limits: adapter.limits(),
                    ..Default::default()
                },
                None,
            )
            .await
            .context("failed to open graphics device")?;

        let surface_caps = surface.get_capabilities(&adapter);

        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .context("surface reports no texture format")?;

        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&device, &config);

        let camera = Camera::new(config.width as f32 / config.height as f32, 45.0);

        let depth_texture = DepthTexture::new(&device, &config);

        let gui = EguiRender::new(&device, config.format, &window);

        let overlay = Overlay::new(&viewer_config.title, viewer_config.point_size);

        let pointcloud = PointCloudRenderer::new(&device, config.format);

        Ok(Self {
            size,
            surface,
            config,
            device,
            queue,
            depth_texture,
            gui,
            overlay,
            window,
            camera,
            pointcloud,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn set_cloud(&mut self, cloud: &PointCloud, report: &LoadReport) {
        self.pointcloud.upload(&self.device, cloud);
        self.overlay.set_sources(cloud, report);
        self.camera.reset();
        self.window.request_redraw();
    }

    /// Returns true when the event was consumed by the overlay, the camera or
    /// a viewer shortcut.
    pub fn input(&mut self, event: &WindowEvent) -> bool {
        if self.gui.input(&self.window, event) {
            return true;
        }

        if self.camera.process_event(event) {
            return true;
        }

        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(keycode),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match keycode {
                KeyCode::Equal | KeyCode::NumpadAdd => {
                    self.overlay.change_point_size(POINT_SIZE_STEP)
                }
                KeyCode::Minus | KeyCode::NumpadSubtract => {
                    self.overlay.change_point_size(-POINT_SIZE_STEP)
                }
                _ => return false,
            },
            _ => return false,
        }

        true
    }

    pub fn update(&mut self) {
        self.pointcloud.update(
            &self.camera,
            &self.queue,
            [self.config.width as f32, self.config.height as f32],
            self.overlay.point_size,
        );
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.camera
                .set_aspect(new_size.width as f32 / new_size.height as f32);
            self.depth_texture = DepthTexture::new(&self.device, &self.config);
        }
    }

    pub fn render(&mut self) -> Result<(), SurfaceError> {
        let output = self.surface.get_current_texture()?;

        let view = output
            .texture
            .create_view(&TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("render_encoder"),
            });

        let _ = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("clear_render_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(Color::BLACK),
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        self.pointcloud
            .draw(&mut encoder, &view, &self.depth_texture);

        let screen_descriptor = ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        let overlay = &mut self.overlay;
        self.gui.draw(
            &self.device,
            &self.queue,
            &mut encoder,
            &self.window,
            &view,
            screen_descriptor,
            |ui| layout(ui, overlay),
        );

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}
