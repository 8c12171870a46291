// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use anyhow::Result;
use clap::Parser;
use hellovk_core::{init_tracing, FpsCounter};
use hellovk_platform::{DirAssetSource, PngDecoder, WinitWindow};
use hellovk_render::{AssetSource, Renderer, RendererConfig};
use hellovk_render_vk::VkRenderer;
use serde::Deserialize;
use tracing::{error, info, warn};

use hellovk_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod bundle;

use bundle::BundledAssets;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with [window] and [render] tables
    #[arg(long, default_value = "hellovk.toml")]
    config: PathBuf,
    /// Asset root; defaults to ./assets
    #[arg(long)]
    assets: Option<PathBuf>,
    /// Force the validation layer on regardless of config
    #[arg(long)]
    validation: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "hellovk".into(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RendererConfig,
}

fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            info!("no config at {} ({e}); using defaults", path.display());
            return AppCfg::default();
        }
    };
    toml::from_str::<AppCfg>(&text).unwrap_or_else(|e| {
        warn!("bad config {}: {e}; using defaults", path.display());
        AppCfg::default()
    })
}

struct App {
    cfg: AppCfg,
    window: Option<Arc<Window>>,
    renderer: VkRenderer,
    assets: Arc<dyn AssetSource>,

    exiting: bool,
    paused: bool,
    fps: FpsCounter,

    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg, assets: Arc<dyn AssetSource>) -> Self {
        let renderer = VkRenderer::new(cfg.render.clone(), Box::new(PngDecoder));
        Self {
            cfg,
            window: None,
            renderer,
            assets,
            exiting: false,
            paused: false,
            fps: FpsCounter::new(Instant::now()),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.exiting = true;
        self.renderer.teardown();
        self.fatal = Some(err);
        event_loop.exit();
    }

    fn bind(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = match &self.window {
            Some(w) => w.clone(),
            None => {
                let attrs = Window::default_attributes()
                    .with_title(self.cfg.window.title.clone())
                    .with_inner_size(LogicalSize::new(
                        self.cfg.window.width,
                        self.cfg.window.height,
                    ));
                let w = Arc::new(event_loop.create_window(attrs)?);
                self.window = Some(w.clone());
                w
            }
        };

        let size = window.inner_size();
        self.paused = size.width == 0 || size.height == 0;

        self.renderer
            .bind_window(Arc::new(WinitWindow::new(window.clone())), self.assets.clone())?;
        info!(
            "window bound {}x{} (paused={})",
            size.width, size.height, self.paused
        );
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if let Err(e) = self.bind(event_loop) {
            self.fail(event_loop, e.context("bind window"));
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
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
                self.renderer.teardown();
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                let now_paused = new_size.width == 0 || new_size.height == 0;
                if self.paused != now_paused {
                    self.paused = now_paused;
                    self.fps.reset(Instant::now());
                }
                info!(
                    "Resized → {}x{} (paused={})",
                    new_size.width, new_size.height, self.paused
                );
                self.renderer.surface_changed();
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                match self.renderer.render() {
                    Ok(()) => self.fps.frame(),
                    Err(e) => self.fail(event_loop, e.context("render")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
        if let Some(fps) = self.fps.poll(Instant::now()) {
            info!("fps ~ {fps}");
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if args.validation {
        cfg.render.enable_validation = true;
    }

    let root = args.assets.unwrap_or_else(|| PathBuf::from("assets"));
    info!("asset root = {}", root.display());
    let assets: Arc<dyn AssetSource> = Arc::new(BundledAssets::with_shaders(
        DirAssetSource::new(root),
        &cfg.render.vertex_shader,
        &cfg.render.fragment_shader,
    ));

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, assets);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
