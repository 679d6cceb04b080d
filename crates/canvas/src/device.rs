//! Backend seam between the runtime and whatever actually talks to the GPU.
//!
//! [`GraphicsDevice`] is deliberately GL-shaped: stages are compiled on their
//! own, linked into a program with fixed attribute locations, uniforms are
//! addressed through locations resolved per program, and textures are bound
//! to numbered units. The wgpu backend in [`crate::gpu`] emulates that model on
//! top of bind groups; [`crate::headless`] records it for tests.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::textures::{TextureImage, TextureOptions};
use crate::uniforms::UniformData;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a backend-specific identifier.
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Returns the backend-specific identifier.
            pub const fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

define_handle!(
    /// A compiled, not yet linked shader stage.
    StageHandle
);
define_handle!(
    /// A linked program ready for drawing.
    ProgramHandle
);
define_handle!(
    /// A texture object owned by the device.
    TextureHandle
);
define_handle!(
    /// A uniform location inside one specific program.
    UniformLocation
);

/// Shader stage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Vertex,
    Fragment,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Vertex => f.write_str("vertex"),
            StageKind::Fragment => f.write_str("fragment"),
        }
    }
}

/// Fixed attribute-location hint applied before linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeBinding {
    pub name: &'static str,
    pub location: u32,
}

pub const POSITION_ATTRIBUTE: AttributeBinding = AttributeBinding {
    name: "a_position",
    location: 0,
};

pub const TEXCOORD_ATTRIBUTE: AttributeBinding = AttributeBinding {
    name: "a_texcoord",
    location: 1,
};

pub const ATTRIBUTE_BINDINGS: [AttributeBinding; 2] = [POSITION_ATTRIBUTE, TEXCOORD_ATTRIBUTE];

/// Two triangles covering clip space.
pub const QUAD_POSITIONS: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [1.0, -1.0],
    [-1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [1.0, 1.0],
];

pub const QUAD_TEXCOORDS: [[f32; 2]; 6] = [
    [0.0, 0.0],
    [1.0, 0.0],
    [0.0, 1.0],
    [0.0, 1.0],
    [1.0, 0.0],
    [1.0, 1.0],
];

pub const QUAD_VERTEX_COUNT: u32 = QUAD_POSITIONS.len() as u32;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("drawing surface was lost and has been reconfigured")]
    SurfaceLost,
    #[error("timed out acquiring the next surface frame")]
    Timeout,
    #[error("unknown program {0:?}")]
    UnknownProgram(ProgramHandle),
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("geometry has not been uploaded")]
    MissingGeometry,
    #[error("{0}")]
    Other(String),
}

/// GL-shaped operations the runtime needs from a backend.
///
/// Compile and link return the native diagnostic log on failure; the runtime
/// turns those into events and never propagates them as errors.
pub trait GraphicsDevice {
    fn compile_stage(&mut self, kind: StageKind, source: &str) -> Result<StageHandle, String>;

    fn release_stage(&mut self, stage: StageHandle);

    fn link_program(
        &mut self,
        stages: &[StageHandle],
        attributes: &[AttributeBinding],
    ) -> Result<ProgramHandle, String>;

    fn release_program(&mut self, program: ProgramHandle);

    /// Uploads the vertex data shared by every program.
    fn upload_geometry(&mut self, positions: &[[f32; 2]], texcoords: &[[f32; 2]]);

    /// Returns `None` when the program has no active uniform called `name`.
    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;

    fn upload_uniform(
        &mut self,
        program: ProgramHandle,
        location: UniformLocation,
        value: &UniformData,
    );

    fn create_texture(&mut self, label: &str) -> Result<TextureHandle, DeviceError>;

    /// Replaces the contents of `texture`; the handle stays valid even when
    /// the new image has a different size.
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        image: &TextureImage,
        options: &TextureOptions,
    ) -> Result<(), DeviceError>;

    fn release_texture(&mut self, texture: TextureHandle);

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);

    fn resize_surface(&mut self, width: u32, height: u32);

    fn clear(&mut self, color: [f32; 4]);

    fn draw(&mut self, program: ProgramHandle, vertex_count: u32) -> Result<(), DeviceError>;
}

/// Capability levels tried by [`GraphicsContext::acquire`], best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityLevel {
    /// Native API on the high-performance adapter.
    HighPerformance,
    /// Native API on the low-power adapter.
    LowPower,
    /// OpenGL/GLES compatibility backend.
    Compatibility,
    /// CPU fallback adapter.
    Software,
}

impl CapabilityLevel {
    pub const DESCENDING: [CapabilityLevel; 4] = [
        CapabilityLevel::HighPerformance,
        CapabilityLevel::LowPower,
        CapabilityLevel::Compatibility,
        CapabilityLevel::Software,
    ];
}

impl fmt::Display for CapabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityLevel::HighPerformance => f.write_str("high-performance"),
            CapabilityLevel::LowPower => f.write_str("low-power"),
            CapabilityLevel::Compatibility => f.write_str("compatibility"),
            CapabilityLevel::Software => f.write_str("software"),
        }
    }
}

/// Options consulted while acquiring a context and while drawing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Colour the target is cleared to before every draw.
    pub background: [f32; 4],
    /// Whether the software adapter may be used as a last resort.
    pub allow_software: bool,
    /// Prefer a vsync'd present mode.
    pub vsync: bool,
    /// Ask the compositor to blend the surface alpha channel.
    pub transparent: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            background: [0.0, 0.0, 0.0, 0.0],
            allow_software: true,
            vsync: true,
            transparent: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("capability level {level} unavailable: {reason}")]
    Unavailable {
        level: CapabilityLevel,
        reason: String,
    },
    #[error("render target has no drawable area")]
    EmptyTarget,
}

/// Builds devices for a particular render target.
pub trait DeviceFactory {
    type Device: GraphicsDevice;

    fn create_device(
        &self,
        level: CapabilityLevel,
        options: &ContextOptions,
    ) -> Result<Self::Device, ContextError>;
}

/// The single live device of a runtime instance.
pub struct GraphicsContext<D> {
    device: Option<D>,
    level: CapabilityLevel,
}

impl<D: GraphicsDevice> GraphicsContext<D> {
    /// Walks [`CapabilityLevel::DESCENDING`] and keeps the first device the
    /// factory produces. Returns `None` when every level fails.
    pub fn acquire<F>(factory: &F, options: &ContextOptions) -> Option<Self>
    where
        F: DeviceFactory<Device = D>,
    {
        for level in CapabilityLevel::DESCENDING {
            if level == CapabilityLevel::Software && !options.allow_software {
                tracing::debug!("software adapter disabled; skipping");
                continue;
            }
            match factory.create_device(level, options) {
                Ok(device) => {
                    tracing::info!(%level, "acquired graphics context");
                    return Some(Self {
                        device: Some(device),
                        level,
                    });
                }
                Err(err) => {
                    tracing::debug!(%level, error = %err, "capability level rejected");
                }
            }
        }
        tracing::error!("no graphics context could be acquired");
        None
    }

    pub fn level(&self) -> CapabilityLevel {
        self.level
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> Option<&mut D> {
        self.device.as_mut()
    }

    pub fn is_live(&self) -> bool {
        self.device.is_some()
    }

    /// Drops the device. Returns `true` only on the call that released it.
    pub fn destroy(&mut self) -> bool {
        match self.device.take() {
            Some(device) => {
                drop(device);
                tracing::debug!(level = %self.level, "graphics context destroyed");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessFactory;

    #[test]
    fn acquire_walks_levels_in_order() {
        let factory = HeadlessFactory::new(64, 64).reject(&[
            CapabilityLevel::HighPerformance,
            CapabilityLevel::LowPower,
        ]);
        let context = GraphicsContext::acquire(&factory, &ContextOptions::default())
            .expect("compatibility level should succeed");
        assert_eq!(context.level(), CapabilityLevel::Compatibility);
        assert_eq!(
            factory.attempts(),
            vec![
                CapabilityLevel::HighPerformance,
                CapabilityLevel::LowPower,
                CapabilityLevel::Compatibility,
            ]
        );
    }

    #[test]
    fn acquire_respects_software_opt_out() {
        let factory = HeadlessFactory::new(64, 64).reject(&[
            CapabilityLevel::HighPerformance,
            CapabilityLevel::LowPower,
            CapabilityLevel::Compatibility,
        ]);
        let options = ContextOptions {
            allow_software: false,
            ..ContextOptions::default()
        };
        assert!(GraphicsContext::acquire(&factory, &options).is_none());
        assert!(!factory.attempts().contains(&CapabilityLevel::Software));
    }

    #[test]
    fn destroy_releases_once() {
        let factory = HeadlessFactory::new(8, 8);
        let mut context =
            GraphicsContext::acquire(&factory, &ContextOptions::default()).expect("context");
        assert!(context.is_live());
        assert!(context.destroy());
        assert!(!context.destroy());
        assert!(context.device().is_none());
    }
}
