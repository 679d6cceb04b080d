//! Turns loosely typed [`UniformValue`] trees into typed upload descriptors.

use std::fmt;

use super::value::UniformValue;

/// Nesting beyond this depth is dropped with a warning.
pub const MAX_INFERENCE_DEPTH: usize = 16;

/// Typed payload of a single uniform upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformData {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    FloatArray(Vec<f32>),
    Sampler(String),
    SamplerArray(Vec<String>),
}

impl UniformData {
    /// Builds a float or vector payload from 1 to 4 components.
    pub fn from_components(values: &[f32]) -> Option<Self> {
        match *values {
            [x] => Some(UniformData::Float(x)),
            [x, y] => Some(UniformData::Vec2([x, y])),
            [x, y, z] => Some(UniformData::Vec3([x, y, z])),
            [x, y, z, w] => Some(UniformData::Vec4([x, y, z, w])),
            _ => None,
        }
    }

    /// GLSL type the payload is expected to land in.
    pub fn type_name(&self) -> &'static str {
        match self {
            UniformData::Float(_) => "float",
            UniformData::Int(_) => "int",
            UniformData::Vec2(_) => "vec2",
            UniformData::Vec3(_) => "vec3",
            UniformData::Vec4(_) => "vec4",
            UniformData::FloatArray(_) => "float[]",
            UniformData::Sampler(_) | UniformData::SamplerArray(_) => "sampler2D",
        }
    }

    pub fn method(&self) -> UploadMethod {
        match self {
            UniformData::Float(_) => UploadMethod::Float1,
            UniformData::Vec2(_) => UploadMethod::FloatVec2,
            UniformData::Vec3(_) => UploadMethod::FloatVec3,
            UniformData::Vec4(_) => UploadMethod::FloatVec4,
            UniformData::FloatArray(_) => UploadMethod::FloatArray,
            UniformData::Int(_) | UniformData::Sampler(_) | UniformData::SamplerArray(_) => {
                UploadMethod::Int1
            }
        }
    }

    /// Float components in upload order. Empty for integer and sampler data.
    pub fn components(&self) -> &[f32] {
        match self {
            UniformData::Float(value) => std::slice::from_ref(value),
            UniformData::Vec2(values) => values,
            UniformData::Vec3(values) => values,
            UniformData::Vec4(values) => values,
            UniformData::FloatArray(values) => values,
            UniformData::Int(_) | UniformData::Sampler(_) | UniformData::SamplerArray(_) => &[],
        }
    }

    pub fn is_texture_reference(&self) -> bool {
        matches!(self, UniformData::Sampler(_) | UniformData::SamplerArray(_))
    }
}

/// GL-style upload call a descriptor maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadMethod {
    Float1,
    FloatVec2,
    FloatVec3,
    FloatVec4,
    FloatArray,
    Int1,
}

impl UploadMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            UploadMethod::Float1 => "1f",
            UploadMethod::FloatVec2 => "2fv",
            UploadMethod::FloatVec3 => "3fv",
            UploadMethod::FloatVec4 => "4fv",
            UploadMethod::FloatArray => "1fv",
            UploadMethod::Int1 => "1i",
        }
    }
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformDescriptor {
    /// Fully qualified path such as `light.color` or `points[2]`.
    pub name: String,
    pub data: UniformData,
}

impl UniformDescriptor {
    pub fn new(name: impl Into<String>, data: UniformData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn method(&self) -> UploadMethod {
        self.data.method()
    }
}

/// Shape of a value as seen by the inferencer, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Scalar,
    Vector(usize),
    FloatArray,
    SamplerArray,
    VectorArray(usize),
    StructArray,
    Bool,
    Sampler,
    Struct,
}

/// Classifies a value without descending into it. `None` means the value
/// cannot become a uniform (null, empty or mixed lists, unsupported nesting).
pub fn classify(value: &UniformValue) -> Option<UniformKind> {
    match value {
        UniformValue::Number(_) => Some(UniformKind::Scalar),
        UniformValue::List(items) => classify_list(items),
        UniformValue::Bool(_) => Some(UniformKind::Bool),
        UniformValue::Text(_) => Some(UniformKind::Sampler),
        UniformValue::Record(_) => Some(UniformKind::Struct),
        UniformValue::Null => None,
    }
}

fn classify_list(items: &[UniformValue]) -> Option<UniformKind> {
    let first = items.first()?;
    match first {
        UniformValue::Number(_) if items.iter().all(UniformValue::is_number) => {
            match items.len() {
                1 => Some(UniformKind::Scalar),
                n @ 2..=4 => Some(UniformKind::Vector(n)),
                _ => Some(UniformKind::FloatArray),
            }
        }
        UniformValue::Text(_) if items.iter().all(|item| item.as_text().is_some()) => {
            Some(UniformKind::SamplerArray)
        }
        UniformValue::List(inner) if inner.first().is_some_and(UniformValue::is_number) => {
            match inner.len() {
                n @ 2..=4 => Some(UniformKind::VectorArray(n)),
                _ => None,
            }
        }
        UniformValue::Record(_) => Some(UniformKind::StructArray),
        _ => None,
    }
}

/// Expands `value` into upload descriptors named after `name`, qualified with
/// `prefix.` when a prefix is given.
pub fn infer(value: &UniformValue, name: &str, prefix: Option<&str>) -> Vec<UniformDescriptor> {
    let qualified = match prefix {
        Some(prefix) => format!("{prefix}.{name}"),
        None => name.to_owned(),
    };
    let mut out = Vec::new();
    descend(value, qualified, 0, &mut out);
    out
}

fn descend(value: &UniformValue, name: String, depth: usize, out: &mut Vec<UniformDescriptor>) {
    if depth > MAX_INFERENCE_DEPTH {
        tracing::warn!(uniform = %name, depth, "uniform value nested too deeply; dropping");
        return;
    }
    let Some(kind) = classify(value) else {
        tracing::debug!(uniform = %name, "skipping uniform value with unsupported shape");
        return;
    };

    match (kind, value) {
        (UniformKind::Scalar, UniformValue::Number(number)) => {
            out.push(UniformDescriptor::new(name, UniformData::Float(*number as f32)));
        }
        (UniformKind::Scalar | UniformKind::Vector(_), UniformValue::List(items)) => {
            if let Some(data) = UniformData::from_components(&numbers(items)) {
                out.push(UniformDescriptor::new(name, data));
            }
        }
        (UniformKind::FloatArray, UniformValue::List(items)) => {
            out.push(UniformDescriptor::new(
                format!("{name}[0]"),
                UniformData::FloatArray(numbers(items)),
            ));
        }
        (UniformKind::SamplerArray, UniformValue::List(items)) => {
            let sources = items
                .iter()
                .filter_map(UniformValue::as_text)
                .map(str::to_owned)
                .collect();
            out.push(UniformDescriptor::new(name, UniformData::SamplerArray(sources)));
        }
        (UniformKind::VectorArray(_), UniformValue::List(items)) => {
            for (index, item) in items.iter().enumerate() {
                let vector = match item {
                    UniformValue::List(inner) if inner.iter().all(UniformValue::is_number) => {
                        UniformData::from_components(&numbers(inner))
                            .filter(|data| !matches!(data, UniformData::Float(_)))
                    }
                    _ => None,
                };
                match vector {
                    Some(data) => out.push(UniformDescriptor::new(format!("{name}[{index}]"), data)),
                    None => tracing::debug!(uniform = %name, index, "skipping malformed vector entry"),
                }
            }
        }
        (UniformKind::StructArray, UniformValue::List(items)) => {
            for (index, item) in items.iter().enumerate() {
                descend(item, format!("{name}[{index}]"), depth + 1, out);
            }
        }
        (UniformKind::Bool, UniformValue::Bool(flag)) => {
            out.push(UniformDescriptor::new(name, UniformData::Int(i32::from(*flag))));
        }
        (UniformKind::Sampler, UniformValue::Text(source)) => {
            out.push(UniformDescriptor::new(name, UniformData::Sampler(source.clone())));
        }
        (UniformKind::Struct, UniformValue::Record(fields)) => {
            for (field, child) in fields {
                descend(child, format!("{name}.{field}"), depth + 1, out);
            }
        }
        _ => {}
    }
}

fn numbers(items: &[UniformValue]) -> Vec<f32> {
    items
        .iter()
        .filter_map(UniformValue::as_number)
        .map(|value| value as f32)
        .collect()
}
