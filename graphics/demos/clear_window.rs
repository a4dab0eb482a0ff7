//! Opens a window and clears the swapchain to a slowly cycling colour.
//!
//! ```bash
//! cargo run --example clear_window
//! RUST_LOG=debug cargo run --example clear_window --features profiling
//! ```
//!
//! Press `V` to toggle vsync, `Escape` to quit.

use std::time::Instant;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use lilium_gpu::{Core, CoreConfig, Fence, GraphicsResult, ImageLayout, Swapchain};

struct Renderer {
    swapchain: Swapchain,
    acquire_fence: Fence,
    core: Core,
}

impl Renderer {
    fn new(event_loop: &ActiveEventLoop, window: &Window) -> GraphicsResult<Self> {
        let invalid = |what: &str| lilium_gpu::GraphicsError::InitializationFailed(what.to_string());
        let display = event_loop
            .display_handle()
            .map_err(|_| invalid("no display handle"))?
            .as_raw();
        let handle = window
            .window_handle()
            .map_err(|_| invalid("no window handle"))?
            .as_raw();

        let config = CoreConfig::new()
            .with_application_name("clear_window")
            .with_instance_extensions(Core::required_surface_extensions(display)?);
        let core = Core::new(config)?;
        log::info!("Running on {}", core.device_info().name);

        let surface = core.create_surface(display, handle)?;
        let size = window.inner_size();
        let swapchain = core.create_swapchain(surface, size.width, size.height, true);
        let acquire_fence = Fence::new(core.handles(), false);

        Ok(Self {
            swapchain,
            acquire_fence,
            core,
        })
    }

    fn render(&mut self, color: [f32; 4]) {
        let Some(image) = self.swapchain.acquire(&self.acquire_fence) else {
            return;
        };

        self.core.begin_frame();
        let cmd = self.core.frame_command_buffer();
        cmd.begin_label("clear", [0.2, 0.6, 1.0, 1.0]);
        cmd.clear_color(&image, color);
        image.transition(cmd, ImageLayout::PresentSrc);
        cmd.end_label();
        self.core.end_frame_for_present();

        self.swapchain.present(&self.core);
    }
}

struct App {
    renderer: Option<Renderer>,
    window: Option<Window>,
    start: Instant,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("Lilium - clear window")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = match event_loop.create_window(attributes) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(event_loop, &window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize graphics: {}", e);
                event_loop.exit();
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match key {
                KeyCode::Escape => event_loop.exit(),
                KeyCode::KeyV => {
                    if let Some(renderer) = &mut self.renderer {
                        let vsync = !renderer.swapchain.vsync();
                        renderer.swapchain.set_vsync(vsync);
                        log::info!("vsync: {}", vsync);
                    }
                }
                _ => {}
            },
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.swapchain.recreate(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let t = self.start.elapsed().as_secs_f32();
                let color = [
                    0.5 + 0.5 * t.sin(),
                    0.5 + 0.5 * (t + 2.1).sin(),
                    0.5 + 0.5 * (t + 4.2).sin(),
                    1.0,
                ];
                if let Some(renderer) = &mut self.renderer {
                    renderer.render(color);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // The surface must be destroyed while its window still exists.
        self.renderer = None;
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    lilium_gpu::profiling::start();

    let event_loop = match EventLoop::new() {
        Ok(el) => el,
        Err(e) => {
            log::error!("Failed to create event loop: {}", e);
            return;
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        renderer: None,
        window: None,
        start: Instant::now(),
    };
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("Event loop error: {}", e);
    }
}
