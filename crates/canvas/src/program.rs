//! Stage compilation, program linking and the fallback policy that keeps a
//! drawable program in place across failed reloads.

use crate::device::{GraphicsDevice, ProgramHandle, StageHandle, StageKind, ATTRIBUTE_BINDINGS};
use crate::events::{CanvasEvent, EventBus};

pub const DEFAULT_VERTEX_SHADER: &str = "\
#ifdef GL_ES
precision mediump float;
#endif

attribute vec2 a_position;
attribute vec2 a_texcoord;

varying vec2 v_texcoord;

void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
    v_texcoord = a_texcoord;
}
";

pub const DEFAULT_FRAGMENT_SHADER: &str = "\
#ifdef GL_ES
precision mediump float;
#endif

varying vec2 v_texcoord;

void main(){
    gl_FragColor = vec4(0.0);
}
";

/// Constant white, substituted when a requested stage does not compile.
pub const FALLBACK_FRAGMENT_SHADER: &str = "void main(){\n\tgl_FragColor = vec4(1.0);\n}";

/// Payload of `shader-compile-failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostics {
    pub kind: StageKind,
    pub source: String,
    /// Native compiler log.
    pub log: String,
}

/// Payload of `program-link-failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDiagnostics {
    pub log: String,
}

/// Result of [`ProgramSlot::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The requested sources are now active.
    Ready,
    /// A requested stage failed; a fallback program is now active.
    Fallback,
    /// Linking failed; the previous program is still active.
    Retained,
    /// Nothing could be made drawable and there was no previous program.
    Failed,
}

impl LoadOutcome {
    /// Whether the active program changed.
    pub fn swapped(self) -> bool {
        matches!(self, LoadOutcome::Ready | LoadOutcome::Fallback)
    }
}

/// Compiles one stage, emitting `shader-compile-failed` on failure.
pub fn compile_stage<D: GraphicsDevice>(
    device: &mut D,
    events: &mut EventBus,
    kind: StageKind,
    source: &str,
) -> Option<StageHandle> {
    match device.compile_stage(kind, source) {
        Ok(stage) => Some(stage),
        Err(log) => {
            tracing::warn!(stage = %kind, %log, "shader compilation failed");
            events.emit(&CanvasEvent::ShaderCompileFailed(CompileDiagnostics {
                kind,
                source: source.to_owned(),
                log,
            }));
            None
        }
    }
}

/// Links `stages` with the fixed attribute locations, emitting
/// `program-link-failed` on failure. The stages are released either way.
pub fn link_program<D: GraphicsDevice>(
    device: &mut D,
    events: &mut EventBus,
    stages: &[StageHandle],
) -> Option<ProgramHandle> {
    let linked = device.link_program(stages, &ATTRIBUTE_BINDINGS);
    for stage in stages {
        device.release_stage(*stage);
    }
    match linked {
        Ok(program) => Some(program),
        Err(log) => {
            tracing::warn!(%log, "program link failed");
            events.emit(&CanvasEvent::ProgramLinkFailed(LinkDiagnostics { log }));
            None
        }
    }
}

/// Links a vertex/fragment pair, releasing whichever half exists when the
/// other failed to compile.
fn link_pair<D: GraphicsDevice>(
    device: &mut D,
    events: &mut EventBus,
    vertex: Option<StageHandle>,
    fragment: Option<StageHandle>,
) -> Option<ProgramHandle> {
    match (vertex, fragment) {
        (Some(vertex), Some(fragment)) => link_program(device, events, &[vertex, fragment]),
        (vertex, fragment) => {
            for stage in vertex.into_iter().chain(fragment) {
                device.release_stage(stage);
            }
            None
        }
    }
}

/// The single active program of a runtime.
#[derive(Debug, Default)]
pub struct ProgramSlot {
    current: Option<ProgramHandle>,
    generation: u64,
    valid: bool,
    fallback_fragment: bool,
}

impl ProgramSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and links `fragment` and `vertex`, substituting built-in
    /// stages where they fail, and swaps the result in. Emits
    /// `program-ready` only when the requested sources made it through.
    pub fn load<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        events: &mut EventBus,
        fragment: &str,
        vertex: &str,
    ) -> LoadOutcome {
        let requested_vertex = compile_stage(device, events, StageKind::Vertex, vertex);
        let vertex_ok = requested_vertex.is_some();
        let vertex_stage = requested_vertex.or_else(|| {
            tracing::info!("using default vertex stage");
            compile_stage(device, events, StageKind::Vertex, DEFAULT_VERTEX_SHADER)
        });

        let requested_fragment = compile_stage(device, events, StageKind::Fragment, fragment);
        let fragment_ok = requested_fragment.is_some();
        let fragment_stage = requested_fragment.or_else(|| {
            tracing::info!("using fallback fragment stage");
            compile_stage(device, events, StageKind::Fragment, FALLBACK_FRAGMENT_SHADER)
        });

        let requested_ok = vertex_ok && fragment_ok;
        let program = link_pair(device, events, vertex_stage, fragment_stage);

        match program {
            Some(program) => {
                self.swap(device, program, requested_ok, !fragment_ok);
                if requested_ok {
                    events.emit(&CanvasEvent::ProgramReady {
                        generation: self.generation,
                    });
                    LoadOutcome::Ready
                } else {
                    LoadOutcome::Fallback
                }
            }
            None if self.current.is_some() => {
                tracing::warn!(generation = self.generation, "keeping previous program");
                self.valid = false;
                LoadOutcome::Retained
            }
            None => self.install_fallback(device, events),
        }
    }

    fn install_fallback<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        events: &mut EventBus,
    ) -> LoadOutcome {
        let vertex = compile_stage(device, events, StageKind::Vertex, DEFAULT_VERTEX_SHADER);
        let fragment = compile_stage(device, events, StageKind::Fragment, FALLBACK_FRAGMENT_SHADER);
        let program = link_pair(device, events, vertex, fragment);
        match program {
            Some(program) => {
                self.swap(device, program, false, true);
                LoadOutcome::Fallback
            }
            None => {
                tracing::error!("fallback program could not be built");
                self.valid = false;
                LoadOutcome::Failed
            }
        }
    }

    fn swap<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        program: ProgramHandle,
        valid: bool,
        fallback_fragment: bool,
    ) {
        if let Some(previous) = self.current.replace(program) {
            device.release_program(previous);
        }
        self.generation += 1;
        self.valid = valid;
        self.fallback_fragment = fallback_fragment;
        tracing::debug!(generation = self.generation, valid, fallback_fragment, "program swapped");
    }

    /// Fragment source the active program was linked from: `requested` when
    /// it made it into the program, the built-in fallback otherwise.
    pub fn active_fragment<'a>(&self, requested: &'a str) -> &'a str {
        if self.fallback_fragment {
            FALLBACK_FRAGMENT_SHADER
        } else {
            requested
        }
    }

    pub fn current(&self) -> Option<ProgramHandle> {
        self.current
    }

    /// Number of successful swaps so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the active program was built from the last requested sources.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn release<D: GraphicsDevice>(&mut self, device: &mut D) {
        if let Some(program) = self.current.take() {
            device.release_program(program);
        }
        self.valid = false;
    }
}
