// SPDX-License-Identifier: CEPL-1.0
//! Desktop glue: winit windows, filesystem assets and PNG decoding.
use std::sync::Arc;

pub use winit;

use hellovk_render::{NativeWindow, RenderSize};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use winit::window::Window;

mod assets;
mod decode;

pub use assets::DirAssetSource;
pub use decode::PngDecoder;

/// Shared winit window usable as a presentation target.
#[derive(Clone)]
pub struct WinitWindow(Arc<Window>);

impl WinitWindow {
    pub fn new(window: Arc<Window>) -> Self {
        Self(window)
    }
}

impl HasWindowHandle for WinitWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.0.window_handle()
    }
}

impl HasDisplayHandle for WinitWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.0.display_handle()
    }
}

impl NativeWindow for WinitWindow {
    fn inner_size(&self) -> RenderSize {
        let size = self.0.inner_size();
        RenderSize {
            width: size.width,
            height: size.height,
        }
    }
}
