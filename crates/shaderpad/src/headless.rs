use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use canvas::headless::{HeadlessDevice, HeadlessFactory, HeadlessTarget};
use canvas::{CanvasEvent, EventKind, InlineDispatcher, ManualTicks, ShaderCanvas};
use serde::Serialize;

use crate::bootstrap::{Settings, ShaderSources};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageError {
    pub stage: String,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextureFailure {
    pub name: String,
    pub error: String,
}

/// What a headless run printed to stdout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeadlessSummary {
    pub capability: Option<String>,
    pub size: [u32; 2],
    pub frames: u64,
    pub valid: bool,
    /// Shader clock at the last drawn frame, in seconds.
    pub elapsed: f64,
    pub compile_errors: Vec<StageError>,
    pub link_errors: Vec<String>,
    pub textures_loaded: Vec<String>,
    pub textures_failed: Vec<TextureFailure>,
}

/// Loads the shaders into the recording backend and ticks `frames` times at
/// the configured rate without sleeping.
pub fn run_headless(settings: &Settings, sources: &ShaderSources, frames: u64) -> HeadlessSummary {
    let (width, height) = settings.size;
    let mut canvas: ShaderCanvas<HeadlessTarget, HeadlessDevice> = ShaderCanvas::with_dispatcher(
        HeadlessTarget::new(f64::from(width), f64::from(height)),
        &HeadlessFactory::new(width, height),
        settings.context.clone(),
        Box::new(InlineDispatcher),
    );

    let summary = Rc::new(RefCell::new(HeadlessSummary {
        capability: canvas.capability_level().map(|level| level.to_string()),
        size: [width, height],
        ..HeadlessSummary::default()
    }));
    subscribe(&mut canvas, &summary);

    if sources.fragment.is_some() || sources.vertex.is_some() {
        let outcome = canvas.load(sources.fragment.as_deref(), sources.vertex.as_deref());
        tracing::info!(?outcome, "loaded shaders");
    }
    canvas.set_uniforms(settings.uniforms.iter().map(|(name, value)| (name, value.clone())));
    for texture in &settings.textures {
        canvas.load_texture(&texture.name, texture.source.clone(), texture.options.clone());
    }
    if settings.paused {
        canvas.pause();
    }

    let start = Instant::now();
    canvas.reset_playback_at(start);
    let fps = f64::from(settings.fps);
    let mut ticks = ManualTicks::new(
        (1..=frames).map(move |n| start + Duration::from_secs_f64(n as f64 / fps)),
    );
    let drawn = canvas.run(&mut ticks);
    tracing::debug!(drawn, requested = frames, "headless run finished");

    let valid = canvas.is_valid();
    canvas.destroy();

    let mut summary = summary.borrow().clone();
    summary.frames = drawn;
    summary.valid = valid;
    summary
}

fn subscribe(
    canvas: &mut ShaderCanvas<HeadlessTarget, HeadlessDevice>,
    summary: &Rc<RefCell<HeadlessSummary>>,
) {
    for kind in [
        EventKind::ShaderCompileFailed,
        EventKind::ProgramLinkFailed,
        EventKind::Render,
        EventKind::TextureLoaded,
        EventKind::TextureFailed,
    ] {
        let sink = Rc::clone(summary);
        canvas.on(kind, move |event| {
            let mut summary = sink.borrow_mut();
            match event {
                CanvasEvent::ShaderCompileFailed(diagnostics) => {
                    summary.compile_errors.push(StageError {
                        stage: diagnostics.kind.to_string(),
                        log: diagnostics.log.clone(),
                    })
                }
                CanvasEvent::ProgramLinkFailed(diagnostics) => {
                    summary.link_errors.push(diagnostics.log.clone())
                }
                CanvasEvent::Render(info) => summary.elapsed = info.elapsed.as_secs_f64(),
                CanvasEvent::TextureLoaded { name, .. } => {
                    summary.textures_loaded.push(name.clone())
                }
                CanvasEvent::TextureFailed { name, error } => {
                    summary.textures_failed.push(TextureFailure {
                        name: name.clone(),
                        error: error.clone(),
                    })
                }
                CanvasEvent::ProgramReady { .. } => {}
            }
        });
    }
}
