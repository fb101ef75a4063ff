// =============================================================================
// VULKAN LEARNING RENDERER
// =============================================================================
//
// Draws a cleared screen, a colored triangle or a textured quad with plain
// Vulkan through ash. The interesting part is the frame loop in renderer.rs:
// a ring of frames in flight, each with its own fence and acquire semaphore.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── Renderer (owns every Vulkan object)                      │
// │          └── Instance -> Surface -> Device -> Swapchain         │
// │                └── Frame ring (command buffer, fence, sem)      │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod backend;
mod config;
mod fps;
mod renderer;
mod scene;

use anyhow::Result;
use backend::RendererError;
use config::Config;
use fps::FpsCounter;
use renderer::{FrameOutcome, Renderer};
use std::process::ExitCode;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

const CONFIG_PATH: &str = "config.toml";

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    // Config first so its log level applies; report how it went once logging is up
    let (config, loaded) = match Config::load_from_path(CONFIG_PATH) {
        Ok(Some(config)) => (config, Ok(true)),
        Ok(None) => (Config::default(), Ok(false)),
        Err(e) => (Config::default(), Err(e)),
    };

    init_logging(&config.debug.log_level);
    match loaded {
        Ok(true) => log::info!("Loaded configuration from {}", CONFIG_PATH),
        Ok(false) => log::info!("Config file not found at {}, using defaults", CONFIG_PATH),
        Err(e) => log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_PATH, e),
    }
    log::debug!("Config: {:?}", config);

    log::info!("Starting Vulkan renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    match run(config) {
        Ok(()) => {
            log::info!("Shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(config: Config) -> Result<()> {
    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Renderer failures map to their category's code, anything else to 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<RendererError>()
        .map_or(1, RendererError::exit_code)
}

/// `RUST_LOG` wins over the configured level
fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer holds the surface
/// created from the window, so it is declared (and dropped) first.
struct App {
    renderer: Option<Renderer>,
    window: Option<Window>,
    config: Config,
    fps: FpsCounter,

    is_fullscreen: bool,
    /// Set when the window is resized - triggers swapchain recreation
    needs_resize: bool,
    /// Set when the window is minimized (size = 0) - skip rendering
    is_minimized: bool,

    /// First unrecoverable error; ends the event loop
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let fps = FpsCounter::new(config.debug.fps_sample_frames, Instant::now());
        Self {
            renderer: None,
            window: None,
            config,
            fps,
            is_fullscreen,
            needs_resize: false,
            is_minimized: false,
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{:#}", err);
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        event_loop.exit();
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self) -> Result<(), RendererError> {
        // Skip rendering if minimized
        if self.is_minimized {
            return Ok(());
        }
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };

        // Handle resize if needed
        if self.needs_resize || renderer.is_swapchain_stale() {
            let size = window.inner_size();
            match renderer.recreate_swapchain(size.width, size.height) {
                Ok(()) => self.needs_resize = false,
                // The surface changed again underneath us; retry next frame
                Err(RendererError::SurfaceOutOfDate) => {
                    log::debug!("Surface changed during swapchain recreation");
                    self.needs_resize = true;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        match renderer.draw_frame()? {
            FrameOutcome::Presented => {
                if self.config.debug.show_fps {
                    if let Some(fps) = self.fps.record_frame(Instant::now()) {
                        window.set_title(&fps::title_with_fps(&self.config.window.title, fps));
                    }
                }
            }
            FrameOutcome::SwapchainOutOfDate => self.needs_resize = true,
            FrameOutcome::FenceTimeout | FrameOutcome::AcquireTimeout => {}
        }
        Ok(())
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;
            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            self.needs_resize = true;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        let size = window.inner_size();
        match Renderer::new(&window, size.width, size.height, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to initialize Vulkan"));
                return;
            }
        }
        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref renderer) = self.renderer {
                    if let Err(e) = renderer.wait_idle() {
                        log::warn!("Failed to wait for device idle: {}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, anyhow::Error::new(e).context("Render error"));
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            // ESC - Quit application
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            // F11 - Toggle fullscreen
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// We use this to request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn renderer_errors_keep_their_exit_code_through_context() {
        let err = anyhow::Error::new(RendererError::NoSuitableDevice { candidates: 2 })
            .context("Failed to initialize Vulkan");
        assert_eq!(exit_code(&err), 3);

        let err = anyhow::Error::new(RendererError::from_vk(
            "vkQueueSubmit",
            vk::Result::ERROR_DEVICE_LOST,
        ));
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn other_errors_exit_with_one() {
        assert_eq!(exit_code(&anyhow::anyhow!("event loop failed")), 1);
    }
}
