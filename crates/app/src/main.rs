//! `vp`: renders a textured, spinning model with Vulkan.
//!
//! Exit codes: 0 after a clean shutdown, 1 when initialization or any other
//! fatal error stops the viewer, 2 when the GPU device is lost.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{error, info, trace, warn};
use winit::application::ApplicationHandler;
use winit::event_loop::ControlFlow;
use winit::window::WindowId;

use vp_core::{AssetPaths, DEFAULT_DIRECTIVES, RendererConfig};
use vp_platform::{ActiveEventLoop, EventLoop, SurfaceEvent, Window, WindowEvent};
use vp_renderer::{FrameStatus, RenderError, Renderer};

const EXIT_FAILURE: u8 = 1;
const EXIT_DEVICE_LOST: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "vp", version, about = "Vulkan model viewer")]
struct CliArgs {
    /// Window width in pixels
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Window height in pixels
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Window title
    #[arg(long, default_value = "vp")]
    title: String,

    /// Frames the CPU may record ahead of the GPU (2 or 3)
    #[arg(long, default_value_t = 2)]
    frames_in_flight: usize,

    /// Enable the Khronos validation layer (`--validation false` to disable)
    #[arg(long, action = ArgAction::Set, default_value_t = cfg!(debug_assertions))]
    validation: bool,

    /// Present with FIFO even when MAILBOX is available
    #[arg(long)]
    vsync: bool,

    /// Upper bound on MSAA samples (1 disables multisampling)
    #[arg(long, default_value_t = 64)]
    msaa: u32,

    /// Upload textures without a mip chain
    #[arg(long)]
    no_mipmaps: bool,

    /// Skip the wireframe overlay draw
    #[arg(long)]
    no_wireframe: bool,

    /// Directory the asset paths are resolved against
    #[arg(long, default_value = ".")]
    assets: PathBuf,

    #[arg(long, default_value = "viking_room.obj")]
    model: PathBuf,

    #[arg(long, default_value = "viking_room.png")]
    texture: PathBuf,

    /// Compiled vertex shader (SPIR-V)
    #[arg(long, default_value = "vert.spv")]
    vertex_shader: PathBuf,

    /// Compiled fragment shader (SPIR-V)
    #[arg(long, default_value = "frag.spv")]
    fragment_shader: PathBuf,

    /// Log level for the viewer crates; RUST_LOG overrides it
    #[arg(long)]
    log_level: Option<String>,
}

impl CliArgs {
    fn config(&self) -> RendererConfig {
        RendererConfig {
            window_title: self.title.clone(),
            window_width: self.width,
            window_height: self.height,
            frames_in_flight: self.frames_in_flight,
            enable_validation: self.validation,
            prefer_mailbox: !self.vsync,
            max_msaa_samples: self.msaa,
            generate_mipmaps: !self.no_mipmaps,
            wireframe_overlay: !self.no_wireframe,
            assets: AssetPaths {
                root: self.assets.clone(),
                model: self.model.clone(),
                texture: self.texture.clone(),
                vertex_shader: self.vertex_shader.clone(),
                fragment_shader: self.fragment_shader.clone(),
            },
            ..RendererConfig::default()
        }
    }

    fn log_directives(&self) -> String {
        match &self.log_level {
            Some(level) => format!("{level},vp_rhi={level},vp_renderer={level}"),
            None => DEFAULT_DIRECTIVES.to_string(),
        }
    }
}

fn exit_code_for(err: &RenderError) -> u8 {
    if err.is_device_lost() {
        EXIT_DEVICE_LOST
    } else {
        EXIT_FAILURE
    }
}

struct App {
    config: RendererConfig,
    // Dropped before the window it renders into.
    renderer: Option<Renderer>,
    window: Option<Window>,
    exit_code: u8,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            exit_code: 0,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: &RenderError) {
        error!("{}", err);
        self.exit_code = exit_code_for(err);
        // A lost device cannot be waited on; just drop everything.
        self.renderer = None;
        event_loop.exit();
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take()
            && let Err(e) = renderer.shutdown()
        {
            warn!("Shutdown did not complete cleanly: {}", e);
            self.exit_code = exit_code_for(&e);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(
            event_loop,
            self.config.window_width,
            self.config.window_height,
            &self.config.window_title,
        ) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, &RenderError::from(e));
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, &e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(surface_event) = SurfaceEvent::from_window_event(&event)
            && let Some(renderer) = self.renderer.as_mut()
        {
            renderer.handle_surface_event(surface_event);
            if renderer.close_requested() {
                info!("Close requested, shutting down");
                self.shutdown(event_loop);
                return;
            }
        }

        if let WindowEvent::RedrawRequested = event
            && let Some(renderer) = self.renderer.as_mut()
        {
            match renderer.render_frame() {
                Ok(FrameStatus::Rendered) => {}
                Ok(status) => trace!("Frame not presented: {:?}", status),
                Err(e) => self.fail(event_loop, &e),
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.window = None;
    }
}

fn run(args: &CliArgs) -> Result<u8> {
    let config = args.config();
    config.validate().context("invalid configuration")?;

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("event loop failed")?;
    Ok(app.exit_code)
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    vp_core::init_logging(&args.log_directives());
    info!("Starting vp {}", env!("CARGO_PKG_VERSION"));

    match run(&args) {
        Ok(code) => {
            info!("Exiting with code {}", code);
            ExitCode::from(code)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use vp_rhi::RhiError;

    use super::*;

    #[test]
    fn test_defaults_match_stock_config() {
        let args = CliArgs::parse_from(["vp"]);
        let config = args.config();
        let stock = RendererConfig::default();
        assert_eq!(config.window_width, stock.window_width);
        assert_eq!(config.window_height, stock.window_height);
        assert_eq!(config.frames_in_flight, stock.frames_in_flight);
        assert_eq!(config.assets, stock.assets);
        assert!(config.prefer_mailbox);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_override_config() {
        let args = CliArgs::parse_from([
            "vp",
            "--width",
            "1280",
            "--frames-in-flight",
            "3",
            "--vsync",
            "--msaa",
            "1",
            "--no-wireframe",
            "--assets",
            "data",
        ]);
        let config = args.config();
        assert_eq!(config.window_width, 1280);
        assert_eq!(config.frames_in_flight, 3);
        assert!(!config.prefer_mailbox);
        assert_eq!(config.max_msaa_samples, 1);
        assert!(!config.wireframe_overlay);
        assert_eq!(config.assets.model_path(), PathBuf::from("data").join("viking_room.obj"));
    }

    #[test]
    fn test_out_of_range_frames_rejected() {
        let args = CliArgs::parse_from(["vp", "--frames-in-flight", "5"]);
        assert!(args.config().validate().is_err());
    }

    #[test]
    fn test_validation_can_be_disabled() {
        let args = CliArgs::parse_from(["vp", "--validation", "false"]);
        assert!(!args.config().enable_validation);
    }

    #[test]
    fn test_log_level_builds_directives() {
        let args = CliArgs::parse_from(["vp", "--log-level", "trace"]);
        assert_eq!(args.log_directives(), "trace,vp_rhi=trace,vp_renderer=trace");
        assert_eq!(CliArgs::parse_from(["vp"]).log_directives(), DEFAULT_DIRECTIVES);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&RenderError::from(RhiError::DeviceLost)), 2);
        assert_eq!(exit_code_for(&RenderError::from(RhiError::NoSuitableGpu)), 1);
        assert_eq!(
            exit_code_for(&RenderError::from(RhiError::UnsupportedSurface("none".into()))),
            1
        );
    }
}
