// SPDX-License-Identifier: CEPL-1.0
//! Window/platform shim. The renderer only ever sees raw window/display
//! handles and client sizes; everything winit-specific stays here and in the app.
pub use winit;

use anyhow::{Context, Result};
use tracing::info;
use winit::{dpi::PhysicalSize, event_loop::ActiveEventLoop, window::Window};

#[derive(Clone, Debug)]
pub struct WindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowDesc {
    fn default() -> Self {
        Self {
            title: "Redwood".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

pub fn create_window(event_loop: &ActiveEventLoop, desc: &WindowDesc) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(desc.title.clone())
        .with_inner_size(PhysicalSize::new(desc.width, desc.height))
        .with_resizable(true);
    let window = event_loop.create_window(attrs).context("create_window")?;

    let (w, h) = client_size(&window);
    info!("window '{}' created ({}x{})", desc.title, w, h);
    Ok(window)
}

/// Current client area in physical pixels. Either side may be 0 while minimised.
pub fn client_size(window: &Window) -> (u32, u32) {
    let PhysicalSize { width, height } = window.inner_size();
    (width, height)
}
