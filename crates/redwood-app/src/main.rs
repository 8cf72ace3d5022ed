// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use redwood_core::init_tracing;
use redwood_platform::{client_size, create_window};
use redwood_render::{Mesh, RenderSize, Renderer, Shader, ShaderSource, SpirvDir, Vertex};
use redwood_render_vk::{FrameOutcome, VkRenderer};
use tracing::{debug, error, info};

use redwood_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;
use config::{AppCfg, PresentModeCfg, ValidationCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (missing file means defaults)
    #[arg(long, default_value = config::DEFAULT_CONFIG)]
    config: PathBuf,
    /// Vulkan validation layers
    #[arg(long, value_enum)]
    validation: Option<ValidationCfg>,
    /// Directory holding <name>.spv shader binaries
    #[arg(long)]
    shader_dir: Option<PathBuf>,
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeCfg>,
}

/// File, then CLI, then environment.
fn resolve_cfg(args: &Args) -> AppCfg {
    let mut cfg = config::load_cfg(&args.config);
    if let Some(v) = args.validation {
        cfg.render.validation = v;
    }
    if let Some(dir) = &args.shader_dir {
        cfg.render.shader_dir = Some(dir.clone());
    }
    if let Some(pm) = args.present_mode {
        cfg.render.present_mode = pm;
    }
    let env = std::env::var(config::VALIDATION_ENV).ok();
    if let Some(v) = config::validation_from_env(env.as_deref()) {
        cfg.render.validation = v;
    }
    cfg
}

#[cfg(feature = "embedded-shaders")]
fn embedded_shaders() -> Option<Box<dyn ShaderSource>> {
    Some(Box::new(redwood_render_vk::EmbeddedShaders))
}

#[cfg(not(feature = "embedded-shaders"))]
fn embedded_shaders() -> Option<Box<dyn ShaderSource>> {
    None
}

fn shader_source(cfg: &AppCfg) -> Box<dyn ShaderSource> {
    if cfg.render.shader_dir.is_none() {
        if let Some(src) = embedded_shaders() {
            info!("using embedded shaders");
            return src;
        }
    }
    let dir = cfg
        .render
        .shader_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("shaders"));
    info!("loading shaders from {}", dir.display());
    Box::new(SpirvDir::new(dir))
}

/// Quad with 16-bit indices, wound clockwise in framebuffer space.
fn demo_quad() -> Result<Mesh> {
    let verts = [
        Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0]),
        Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]),
        Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0]),
        Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0]),
    ];
    Mesh::from_slices(&verts, &[0, 1, 2, 2, 3, 0])
}

struct App {
    cfg: AppCfg,
    // Renderer before window: it must go while the surface's window still exists.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,
    fatal: Option<anyhow::Error>,
    exiting: bool,

    frames: u32,
    skipped: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            renderer: None,
            window: None,
            render_size: RenderSize::default(),
            fatal: None,
            exiting: false,
            frames: 0,
            skipped: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(event_loop, &self.cfg.window_desc())?;
        self.render_size = client_size(&window).into();

        let mut renderer = VkRenderer::new(
            &window,
            &window,
            self.render_size,
            self.cfg.vk_config(),
            shader_source(&self.cfg),
        )
        .context("vulkan init")?;

        let quad = renderer.upload_mesh(demo_quad()?)?;
        let shader = Shader::new("triangle.vert", "triangle.frag");
        renderer.draw_mesh(quad, &shader)?;

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    /// Logs nothing here; the error is surfaced once from `main`.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.exiting = true;
        self.fatal = Some(err);
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                debug!("Resized → {}x{}", new_size.width, new_size.height);
                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(self.render_size) {
                        self.fail(event_loop, e);
                        return;
                    }
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let Some(r) = &mut self.renderer else {
                    return;
                };
                match r.draw_frame() {
                    Ok(FrameOutcome::Presented { .. }) => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(FrameOutcome::Skipped(reason)) => {
                        self.skipped = self.skipped.saturating_add(1);
                        debug!("frame skipped: {reason:?}");
                    }
                    Err(e) => self.fail(event_loop, e.into()),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        // Minimised: sleep until the next event instead of spinning.
        if self.render_size.is_empty() {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {} (skipped {})", self.frames, self.skipped);
            self.frames = 0;
            self.skipped = 0;
            self.last_fps_instant = now;
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let cfg = resolve_cfg(&args);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_quad_shape() {
        let q = demo_quad().unwrap();
        assert_eq!(q.index_count(), 6);
        assert_eq!(q.vertex_bytes().len(), 4 * Vertex::STRIDE as usize);
    }

    #[test]
    fn cli_overrides_file() {
        let args = Args::parse_from([
            "redwood",
            "--config",
            "no/such/file.toml",
            "--present-mode",
            "fifo",
            "--shader-dir",
            "out/spv",
        ]);
        let cfg = resolve_cfg(&args);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.render.shader_dir, Some(PathBuf::from("out/spv")));
    }

    #[cfg(feature = "embedded-shaders")]
    #[test]
    fn default_build_finds_demo_shaders() {
        let cfg = AppCfg::default();
        assert!(cfg.render.shader_dir.is_none());
        let src = shader_source(&cfg);
        assert!(src.load_bytecode("triangle.vert").is_ok());
        assert!(src.load_bytecode("triangle.frag").is_ok());
    }
}
