//! Live GLSL canvas runtime.
//!
//! A [`ShaderCanvas`] owns one graphics context, one linked program drawn over
//! a full-screen quad, the uniforms fed to it and the textures it samples.
//! Callers drive it one [`tick`](ShaderCanvas::tick) at a time:
//!
//! ```text
//!   load(fragment) ──▶ ProgramSlot ──▶ compile / link / fallback
//!                                          │
//!   set_uniform ──▶ infer ──▶ UniformRegistry ◀── TextureManager ◀── load_texture
//!                                          │            ▲
//!   tick(now) ─▶ drain textures ─▶ resize ─▶ decide ─▶ inject u_* ─▶ flush ─▶ draw
//!                                                                    │
//!                                                       EventBus ◀───┘ render
//! ```
//!
//! Backends implement [`GraphicsDevice`]. [`headless`] records calls without
//! touching a GPU; [`gpu`] renders through `wgpu` into a window surface,
//! translating GLSL ES style sources to Vulkan GLSL on the way.

mod canvas;
pub mod device;
pub mod events;
pub mod gpu;
pub mod headless;
pub mod program;
pub mod scheduler;
pub mod target;
pub mod textures;
pub mod uniforms;

pub use canvas::{FrameReport, ShaderCanvas};
pub use device::{
    CapabilityLevel, ContextError, ContextOptions, DeviceError, DeviceFactory, GraphicsContext,
    GraphicsDevice,
};
pub use events::{CanvasEvent, EventBus, EventKind, RenderInfo, SubscriptionId};
pub use program::{CompileDiagnostics, LinkDiagnostics, LoadOutcome};
pub use scheduler::{IntervalTicker, ManualTicks, PlaybackState, TickSource};
pub use target::{RenderTarget, SurfaceSize};
pub use textures::{
    Dispatcher, InlineDispatcher, TextureError, TextureFiltering, TextureImage, TextureOptions,
    TextureSource, ThreadDispatcher,
};
pub use uniforms::{infer, UniformData, UniformDescriptor, UniformValue};
