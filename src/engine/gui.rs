use egui::{Align2, Color32, Context, Rounding, Shadow, Slider, Visuals};
use egui_wgpu::{Renderer, ScreenDescriptor};
use egui_winit::State;
use wgpu::{
    CommandEncoder, Device, LoadOp, Operations, Queue, RenderPassColorAttachment,
    RenderPassDescriptor, StoreOp, TextureFormat, TextureView,
};
use winit::{event::WindowEvent, window::Window};

use crate::{cloud::PointCloud, shell::LoadReport};

pub const MIN_POINT_SIZE: f32 = 1.0;
pub const MAX_POINT_SIZE: f32 = 10.0;

pub struct EguiRender {
    context: Context,
    state: State,
    renderer: Renderer,
}

impl EguiRender {
    pub fn new(device: &Device, output_color_format: TextureFormat, window: &Window) -> Self {
        let context = Context::default();
        let id = context.viewport_id();

        const BORDER_RADIUS: f32 = 2.0;

        let visuals = Visuals {
            window_rounding: Rounding::same(BORDER_RADIUS),
            window_shadow: Shadow::NONE,
            ..Default::default()
        };

        context.set_visuals(visuals);

        let state = State::new(
            context.clone(),
            id,
            window,
            Some(window.scale_factor() as f32),
            window.theme(),
            None,
        );

        let renderer = Renderer::new(device, output_color_format, None, 1, false);

        Self {
            context,
            state,
            renderer,
        }
    }

    pub fn input(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.state.on_window_event(window, event).consumed
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        window: &Window,
        window_surface_view: &TextureView,
        screen_descriptor: ScreenDescriptor,
        mut run_ui: impl FnMut(&Context),
    ) {
        let raw_input = self.state.take_egui_input(window);
        let full_output = self.context.run(raw_input, |ctx| run_ui(ctx));

        self.state
            .handle_platform_output(window, full_output.platform_output);

        let tris = self
            .context
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.renderer
                .update_texture(device, queue, *id, image_delta);
        }

        self.renderer
            .update_buffers(device, queue, encoder, &tris, &screen_descriptor);

        {
            let mut render_pass = encoder
                .begin_render_pass(&RenderPassDescriptor {
                    color_attachments: &[Some(RenderPassColorAttachment {
                        view: window_surface_view,
                        resolve_target: None,
                        ops: Operations {
                            load: LoadOp::Load,
                            store: StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    label: Some("egui_render_pass"),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();

            self.renderer
                .render(&mut render_pass, &tris, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.renderer.free_texture(id);
        }
    }
}

/// What the info panel shows about the loaded files.
#[derive(Debug, Default)]
pub struct Overlay {
    title: String,
    total_points: usize,
    sources: Vec<(String, Result<usize, String>)>,
    pub point_size: f32,
}

impl Overlay {
    pub fn new(title: &str, point_size: f32) -> Self {
        Self {
            title: title.to_string(),
            point_size,
            ..Default::default()
        }
    }

    pub fn set_sources(&mut self, cloud: &PointCloud, report: &LoadReport) {
        self.total_points = cloud.len();
        self.sources = report
            .entries()
            .iter()
            .map(|entry| (entry.path.display().to_string(), entry.outcome.clone()))
            .collect();
    }

    pub fn change_point_size(&mut self, delta: f32) {
        self.point_size = (self.point_size + delta).clamp(MIN_POINT_SIZE, MAX_POINT_SIZE);
    }
}

pub fn layout(ui: &Context, overlay: &mut Overlay) {
    egui::Window::new(overlay.title.as_str())
        .default_open(true)
        .max_width(640.0)
        .max_height(360.0)
        .default_width(300.0)
        .resizable(true)
        .anchor(Align2::LEFT_TOP, [0.0, 0.0])
        .show(ui, |ui| {
            ui.label(format!("{} points", overlay.total_points));

            if overlay.sources.is_empty() {
                ui.label("no files given");
            }

            for (path, outcome) in &overlay.sources {
                match outcome {
                    Ok(count) => ui.label(format!("{}: {} points", path, count)),
                    Err(e) => ui.colored_label(Color32::LIGHT_RED, format!("{}: {}", path, e)),
                };
            }

            ui.separator();
            ui.add(
                Slider::new(&mut overlay.point_size, MIN_POINT_SIZE..=MAX_POINT_SIZE)
                    .text("point size"),
            );
            ui.label("drag: rotate  wheel: zoom  r: reset  +/-: point size  q: quit");
        });
}
