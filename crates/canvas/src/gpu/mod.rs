//! `wgpu` backend for windowed rendering.
//!
//! - `context` walks capability levels onto wgpu backends and adapters and
//!   owns the surface configuration.
//! - `glsl` lifts GLSL ES style declarations into a generated Vulkan GLSL
//!   header and validates stages with naga at compile time.
//! - `layout` packs loose uniforms into one std140 block.
//! - `texture` keeps per-handle texture, view and sampler triples.
//! - `device` implements [`GraphicsDevice`](crate::GraphicsDevice) on top of
//!   the pieces above.

mod context;
mod device;
mod glsl;
mod layout;
mod texture;

pub use context::WgpuFactory;
pub use device::WgpuDevice;
