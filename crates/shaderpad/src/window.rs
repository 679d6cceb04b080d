use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use canvas::gpu::{WgpuDevice, WgpuFactory};
use canvas::{
    CanvasEvent, EventKind, LoadOutcome, PlaybackState, RenderTarget, ShaderCanvas, SurfaceSize,
};
use winit::dpi::{LogicalSize, PhysicalPosition};
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::bootstrap::{Settings, ShaderSources, ShaderStage};
use crate::watch::{FileWatcher, ShaderChange, POLL_INTERVAL};

/// A winit window seen as a render target. Sizes and the pointer are kept in
/// logical units; the scale factor is the pixel ratio.
struct WindowTarget {
    window: Arc<Window>,
    pointer: Option<(f64, f64)>,
    visible: bool,
}

impl WindowTarget {
    fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            pointer: None,
            visible: true,
        }
    }

    fn track_pointer(&mut self, position: PhysicalPosition<f64>) {
        let logical = position.to_logical::<f64>(self.window.scale_factor());
        self.pointer = Some((logical.x, logical.y));
    }
}

impl RenderTarget for WindowTarget {
    fn client_size(&self) -> (f64, f64) {
        let size = self
            .window
            .inner_size()
            .to_logical::<f64>(self.window.scale_factor());
        (size.width, size.height)
    }

    fn pixel_ratio(&self) -> f64 {
        self.window.scale_factor()
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn pointer(&self) -> Option<(f64, f64)> {
        self.pointer
    }
}

/// Opens a window and renders until it is closed.
pub fn run_window(settings: &Settings, sources: &ShaderSources) -> Result<()> {
    let mut builder = EventLoopBuilder::<ShaderChange>::with_user_event();
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use winit::platform::wayland::EventLoopBuilderExtWayland;
        EventLoopBuilderExtWayland::with_any_thread(&mut builder, true);
    }
    let event_loop = builder
        .build()
        .map_err(|err| anyhow!("failed to create event loop: {err}"))?;

    let (width, height) = settings.size;
    let window = WindowBuilder::new()
        .with_title(settings.title.as_str())
        .with_inner_size(LogicalSize::new(width, height))
        .with_transparent(settings.context.transparent)
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;
    let window = Arc::new(window);

    let physical = window.inner_size();
    let factory = WgpuFactory::new(
        window.clone(),
        SurfaceSize::new(physical.width, physical.height),
    );
    let mut canvas: ShaderCanvas<WindowTarget, WgpuDevice> = ShaderCanvas::new(
        WindowTarget::new(window.clone()),
        &factory,
        settings.context.clone(),
    );
    if canvas.is_inert() {
        bail!("no graphics adapter could drive the window");
    }
    tracing::info!(
        level = %canvas.capability_level().map(|level| level.to_string()).unwrap_or_default(),
        "graphics context ready"
    );

    canvas.on(EventKind::ShaderCompileFailed, |event| {
        if let CanvasEvent::ShaderCompileFailed(diagnostics) = event {
            tracing::error!(stage = %diagnostics.kind, "{}", diagnostics.log);
        }
    });
    canvas.on(EventKind::ProgramLinkFailed, |event| {
        if let CanvasEvent::ProgramLinkFailed(diagnostics) = event {
            tracing::error!("{}", diagnostics.log);
        }
    });

    if sources.fragment.is_some() || sources.vertex.is_some() {
        canvas.load(sources.fragment.as_deref(), sources.vertex.as_deref());
    }
    canvas.set_uniforms(settings.uniforms.iter().map(|(name, value)| (name, value.clone())));
    for texture in &settings.textures {
        canvas.load_texture(&texture.name, texture.source.clone(), texture.options.clone());
    }
    if settings.paused {
        canvas.pause();
    }

    let _watcher = if settings.watch && !settings.watched_files().is_empty() {
        let proxy = event_loop.create_proxy();
        Some(FileWatcher::spawn(
            settings.watched_files(),
            POLL_INTERVAL,
            move |change| {
                let _ = proxy.send_event(change);
            },
        )?)
    } else {
        None
    };

    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(settings.fps));
    let mut next_frame = Instant::now();
    window.request_redraw();

    let run_result = event_loop.run(move |event, elwt| match event {
        Event::UserEvent(change) => {
            let outcome = match change.stage {
                ShaderStage::Fragment => canvas.load(Some(&change.source), None),
                ShaderStage::Vertex => canvas.load(None, Some(&change.source)),
            };
            match outcome {
                LoadOutcome::Ready => {
                    tracing::info!(path = %change.path.display(), "shader reloaded")
                }
                other => tracing::warn!(
                    path = %change.path.display(),
                    outcome = ?other,
                    "shader reload did not produce a new program"
                ),
            }
            window.request_redraw();
        }
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                canvas.destroy();
                elwt.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                match event.logical_key {
                    Key::Named(NamedKey::Space) => {
                        let state = canvas.toggle_playback();
                        tracing::info!(paused = state == PlaybackState::Paused, "playback toggled");
                    }
                    Key::Named(NamedKey::Escape) => {
                        canvas.destroy();
                        elwt.exit();
                    }
                    Key::Character(ref value) if value.eq_ignore_ascii_case("r") => {
                        canvas.reset_playback();
                        tracing::info!("playback reset");
                    }
                    _ => {}
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                canvas.target_mut().track_pointer(position);
            }
            WindowEvent::CursorLeft { .. } => {
                canvas.target_mut().pointer = None;
            }
            WindowEvent::Occluded(occluded) => {
                canvas.target_mut().visible = !occluded;
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if canvas.resize() {
                    window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                if canvas.tick(Instant::now()).is_none() {
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            if now >= next_frame {
                window.request_redraw();
                next_frame = now + frame_interval;
            }
            elwt.set_control_flow(ControlFlow::WaitUntil(next_frame));
        }
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}
