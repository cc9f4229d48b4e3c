//! Interactive viewer: a winit window driving an [`Engine`] with the wgpu
//! backend.
//!
//! | Input            | Action                                      |
//! |------------------|---------------------------------------------|
//! | Left drag        | move the blob under the cursor              |
//! | Left click       | select a blob                               |
//! | `F`              | fork from the selection (or the root)       |
//! | `M`              | merge the selection into its nearest blob   |
//! | `=` / `-`        | raise or lower the selection's field weight |
//! | `E`              | export state to the state file              |
//! | `Escape`         | quit                                        |

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use glam::Vec2;
use tracing::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::engine::Engine;
use crate::error::{RenderError, ViewerError};
use crate::gpu::GpuBackend;
use crate::interaction::Command;
use crate::source::SourceId;

/// Default file written by the export key.
pub const STATE_FILE: &str = "blobfield_state.json";

const WEIGHT_STEP: f32 = 0.25;

pub struct Viewer {
    engine: Engine,
    state_path: PathBuf,
    window: Option<Arc<Window>>,
    backend: Option<GpuBackend>,
    selected: Option<SourceId>,
    cursor: Vec2,
    mouse_pressed: bool,
    /// First fatal error seen inside the event loop.
    failure: Option<ViewerError>,
}

impl Viewer {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            state_path: PathBuf::from(STATE_FILE),
            window: None,
            backend: None,
            selected: None,
            cursor: Vec2::ZERO,
            mouse_pressed: false,
            failure: None,
        }
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = path.into();
        self
    }

    /// Open the window and run until it is closed.
    pub fn run(mut self) -> Result<(), ViewerError> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: ViewerError) {
        error!(%err, "viewer stopped");
        self.failure.get_or_insert(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(backend) = &mut self.backend {
            self.engine.shutdown(backend);
        }
        event_loop.exit();
    }

    fn run_command(&mut self, command: Command) {
        match self.engine.apply(command) {
            Ok(outcome) => {
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
                debug!(?outcome, "command applied");
            }
            Err(err) => warn!(?command, %err, "command rejected"),
        }
    }

    fn fork_selected(&mut self) {
        let parent = self.selected.unwrap_or_else(|| self.engine.tree().root());
        self.run_command(Command::Fork { parent });
    }

    fn merge_selected(&mut self) {
        let Some(from) = self.selected else {
            info!("nothing selected to merge");
            return;
        };
        let Some(to) = self.engine.snapshot().nearest_to(from) else {
            info!(%from, "no neighbour to merge into");
            return;
        };
        self.run_command(Command::Merge { from, to });
        if !self.engine.tree().contains(from) {
            self.selected = Some(to);
        }
    }

    fn nudge_weight(&mut self, delta: f32) {
        let Some(id) = self.selected else {
            return;
        };
        let Some(source) = self.engine.tree().get(id) else {
            return;
        };
        let weight = (source.weight + delta).clamp(0.0, 4.0);
        self.run_command(Command::SetWeight { id, weight });
    }

    fn export(&self) {
        let result = self
            .engine
            .export_json()
            .map_err(ViewerError::from)
            .and_then(|json| fs::write(&self.state_path, json).map_err(ViewerError::from));
        match result {
            Ok(()) => info!(path = %self.state_path.display(), "exported state"),
            Err(err) => warn!(%err, "export failed"),
        }
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, event: KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        match event.physical_key {
            PhysicalKey::Code(KeyCode::KeyF) => self.fork_selected(),
            PhysicalKey::Code(KeyCode::KeyM) => self.merge_selected(),
            PhysicalKey::Code(KeyCode::Equal) => self.nudge_weight(WEIGHT_STEP),
            PhysicalKey::Code(KeyCode::Minus) => self.nudge_weight(-WEIGHT_STEP),
            PhysicalKey::Code(KeyCode::KeyE) => self.export(),
            PhysicalKey::Code(KeyCode::Escape) => self.shutdown(event_loop),
            _ => {}
        }
    }
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window_attrs = Window::default_attributes()
            .with_title("Blobfield")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => return self.fail(event_loop, err.into()),
        };
        self.window = Some(window.clone());

        let config = self.engine.config().clone();
        match pollster::block_on(GpuBackend::new(window.clone(), &config.render, &config.field)) {
            Ok(mut backend) => {
                let size = window.inner_size();
                self.engine.resize(&mut backend, size.width, size.height);
                self.backend = Some(backend);
                window.request_redraw();
            }
            Err(err) => self.fail(event_loop, err.into()),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),
            WindowEvent::Resized(physical_size) => {
                if let Some(backend) = &mut self.backend {
                    self.engine.resize(backend, physical_size.width, physical_size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => self.on_key(event_loop, event),
            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    self.mouse_pressed = state == ElementState::Pressed;
                    if self.mouse_pressed {
                        self.selected = self.engine.pick(self.cursor);
                    } else if let Some(id) = self.engine.dragging() {
                        self.run_command(Command::Release { id });
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = Vec2::new(position.x as f32, position.y as f32);
                if self.mouse_pressed {
                    if let Some(id) = self.selected {
                        self.run_command(Command::Drag { id, screen: self.cursor });
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(backend) = &mut self.backend {
                    match self.engine.tick(backend) {
                        Ok(_) => {}
                        Err(err @ RenderError::OutOfMemory) => {
                            error!(%err, "render failed");
                            return self.shutdown(event_loop);
                        }
                        Err(err) => warn!(%err, "render failed"),
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}
