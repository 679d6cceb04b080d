//! User and standard uniforms: value trees, type inference, diffing and the
//! usage heuristic for the built-in `u_*` inputs.

mod infer;
mod registry;
pub mod usage;
mod value;

pub use infer::{
    classify, infer, UniformData, UniformDescriptor, UniformKind, UploadMethod,
    MAX_INFERENCE_DEPTH,
};
pub use registry::UniformRegistry;
pub use usage::UniformUsage;
pub use value::UniformValue;
