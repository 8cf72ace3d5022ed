// SPDX-License-Identifier: CEPL-1.0
//! Runs against a real Vulkan device and window. Ignored by default:
//! `cargo test -p redwood-render-vk -- --ignored` on a machine with a GPU.
use anyhow::{bail, ensure, Result};
use redwood_platform::{
    client_size, create_window,
    winit::{
        application::ApplicationHandler,
        event::WindowEvent,
        event_loop::{ActiveEventLoop, EventLoop},
        window::WindowId,
    },
    WindowDesc,
};
use redwood_render::{Mesh, RenderSize, Renderer, ShaderSource, Vertex};
use redwood_render_vk::{FrameOutcome, SkipReason, VkConfig, VkRenderer};

/// The draw list stays empty, so no pipeline is ever built.
struct NoShaders;

impl ShaderSource for NoShaders {
    fn load_bytecode(&self, name: &str) -> Result<Vec<u8>> {
        bail!("no shaders available for '{name}'")
    }
}

fn quad() -> Result<Mesh> {
    let verts = [
        Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0]),
        Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]),
        Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0]),
        Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0]),
    ];
    Mesh::from_slices(&verts, &[0, 1, 2, 2, 3, 0])
}

fn present_one(renderer: &mut VkRenderer) -> Result<()> {
    for _ in 0..8 {
        if let FrameOutcome::Presented { .. } = renderer.draw_frame()? {
            return Ok(());
        }
    }
    bail!("no frame presented in 8 attempts")
}

fn scenario(event_loop: &ActiveEventLoop) -> Result<()> {
    let desc = WindowDesc {
        title: "redwood device test".to_owned(),
        width: 320,
        height: 240,
    };
    let window = create_window(event_loop, &desc)?;
    let size = RenderSize::from(client_size(&window));
    let mut renderer = VkRenderer::new(
        &window,
        &window,
        size,
        VkConfig::default(),
        Box::new(NoShaders),
    )?;

    let mesh = quad()?;
    let (vertices, indices) = (mesh.vertex_bytes().to_vec(), mesh.index_bytes().to_vec());
    let handle = renderer.upload_mesh(mesh)?;
    let (got_vertices, got_indices) = renderer.read_back_mesh(handle)?;
    ensure!(got_vertices == vertices, "vertex bytes differ after upload");
    ensure!(got_indices == indices, "index bytes differ after upload");

    present_one(&mut renderer)?;

    renderer.resize(RenderSize::new(200, 150))?;
    let outcome = renderer.draw_frame()?;
    ensure!(
        outcome == FrameOutcome::Skipped(SkipReason::Rebuilt),
        "expected a rebuild frame after resize, got {outcome:?}"
    );
    present_one(&mut renderer)?;

    drop(renderer);
    drop(window);
    Ok(())
}

#[derive(Default)]
struct Harness {
    result: Option<Result<()>>,
}

impl ApplicationHandler for Harness {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.result.is_none() {
            self.result = Some(scenario(event_loop));
        }
        event_loop.exit();
    }

    fn window_event(&mut self, _: &ActiveEventLoop, _: WindowId, _: WindowEvent) {}
}

#[test]
#[ignore = "needs a Vulkan-capable GPU and a display"]
fn upload_read_back_and_resize_on_device() -> Result<()> {
    let mut builder = EventLoop::builder();
    #[cfg(target_os = "linux")]
    {
        use redwood_platform::winit::platform::x11::EventLoopBuilderExtX11;
        builder.with_any_thread(true);
    }
    let event_loop = builder.build()?;

    let mut harness = Harness::default();
    event_loop.run_app(&mut harness)?;
    match harness.result {
        Some(result) => result,
        None => bail!("event loop exited before resume"),
    }
}
