use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{debug, error, info};
use wgpu::SurfaceError;
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

use crate::{cloud::PointCloud, config::ViewerConfig, engine::Engine, shell::LoadReport};

/// An interactive window showing one point cloud.
pub trait Viewer {
    /// Hands the cloud to the viewer. Called once, after loading.
    fn add_point_cloud(&mut self, cloud: &PointCloud, report: &LoadReport) -> Result<()>;

    /// True once the user closed the window.
    fn was_stopped(&self) -> bool;

    /// Renders and processes window events for at most `timeout`.
    fn spin_once(&mut self, timeout: Duration);
}

/// Window backed viewer. The winit event loop is pumped from the caller's
/// thread instead of taking it over.
pub struct PcdViewer {
    event_loop: EventLoop<()>,
    app: ViewerApp,
}

impl PcdViewer {
    /// Opens the window. Fails when no window or graphics device is available.
    pub fn new(config: &ViewerConfig) -> Result<Self> {
        let event_loop = EventLoop::new().context("failed to create event loop")?;
        event_loop.set_control_flow(ControlFlow::Wait);

        let mut viewer = Self {
            event_loop,
            app: ViewerApp::new(config.clone()),
        };

        viewer.pump(Duration::ZERO);

        if let Some(e) = viewer.app.failure.take() {
            return Err(e);
        }

        Ok(viewer)
    }

    fn pump(&mut self, timeout: Duration) {
        let status = self
            .event_loop
            .pump_app_events(Some(timeout), &mut self.app);

        if let PumpStatus::Exit(code) = status {
            debug!("event loop exited with {}", code);
            self.app.stop();
        }
    }
}

impl Viewer for PcdViewer {
    fn add_point_cloud(&mut self, cloud: &PointCloud, report: &LoadReport) -> Result<()> {
        match self.app.engine.as_mut() {
            Some(engine) => engine.set_cloud(cloud, report),
            None => self.app.pending = Some((cloud.clone(), report.clone())),
        }

        Ok(())
    }

    fn was_stopped(&self) -> bool {
        self.app.stopped
    }

    fn spin_once(&mut self, timeout: Duration) {
        if let Some(engine) = &self.app.engine {
            engine.window().request_redraw();
        }

        self.pump(timeout);
    }
}

struct ViewerApp {
    config: ViewerConfig,
    engine: Option<Engine>,
    pending: Option<(PointCloud, LoadReport)>,
    failure: Option<anyhow::Error>,
    stopped: bool,
}

impl ViewerApp {
    fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            engine: None,
            pending: None,
            failure: None,
            stopped: false,
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        // closes the window
        self.engine = None;
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<Engine> {
        let attributes = Window::default_attributes()
            .with_title(self.config.title.as_str())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("failed to create window")?,
        );

        let mut engine = pollster::block_on(Engine::new(window, &self.config))?;

        if let Some((cloud, report)) = self.pending.take() {
            engine.set_cloud(&cloud, &report);
        }

        Ok(engine)
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.engine.is_some() || self.stopped {
            return;
        }

        match self.open(event_loop) {
            Ok(engine) => {
                info!("opened window \"{}\"", self.config.title);
                self.engine = Some(engine);
            }
            Err(e) => {
                self.failure = Some(e);
                self.stopped = true;
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        if window_id != engine.window().id() || engine.input(&event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::KeyQ | KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                info!("viewer closed");
                self.stop();
                event_loop.exit();
            }
            WindowEvent::Resized(physical_size) => {
                engine.resize(physical_size);
                engine.window().request_redraw();
            }
            WindowEvent::RedrawRequested => {
                engine.update();
                match engine.render() {
                    Ok(_) => {}
                    Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                        engine.resize(engine.size())
                    }
                    Err(SurfaceError::Timeout) => debug!("surface timeout, skipping frame"),
                    Err(e @ SurfaceError::OutOfMemory) => {
                        error!("render failed: {}", e);
                        self.stop();
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.stop();
    }
}
