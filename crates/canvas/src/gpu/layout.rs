//! std140 layout of the generated `CanvasUniforms` block.

use bytemuck::cast_slice;

use super::glsl::{Declaration, GlslType, StructType, ValueType};
use crate::uniforms::UniformData;

const VEC4_ALIGN: u32 = 16;

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// `(size, alignment)` of a single element.
fn element_extent(ty: GlslType) -> (u32, u32) {
    match ty.shape() {
        (1, 1) => (4, 4),
        (1, 2) => (8, 8),
        (1, 3) => (12, VEC4_ALIGN),
        (1, _) => (16, VEC4_ALIGN),
        (columns, _) => (columns * VEC4_ALIGN, VEC4_ALIGN),
    }
}

/// A leaf of the block. Struct members are flattened into paths such as
/// `u_light.color` and `u_lights[1].color`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldLayout {
    pub name: String,
    pub ty: GlslType,
    pub offset: u32,
    pub array_len: Option<u32>,
    pub stride: u32,
}

/// Where a resolved uniform name lives inside the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockSlot {
    pub offset: u32,
    pub ty: GlslType,
    /// Elements from `offset` to the end of the array (1 for non-arrays).
    pub elements: u32,
    pub stride: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockLayout {
    fields: Vec<FieldLayout>,
    size: u32,
}

impl BlockLayout {
    /// Lays out the viewport followed by `uniforms` in declaration order.
    pub(crate) fn new(uniforms: &[Declaration]) -> Self {
        let mut fields = Vec::with_capacity(uniforms.len());
        // `_canvas_viewport` occupies the first vec2.
        let end = lay_out(&mut fields, "", uniforms, 8);
        Self {
            fields,
            size: round_up(end, VEC4_ALIGN),
        }
    }

    pub(crate) fn size(&self) -> u32 {
        self.size
    }

    pub(crate) fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    /// Resolves a leaf path, optionally ending in `[index]`.
    pub(crate) fn locate(&self, name: &str) -> Option<BlockSlot> {
        let (base, index) = match name.strip_suffix(']').and_then(|rest| rest.rsplit_once('[')) {
            Some((base, index)) => (base, Some(index.parse::<u32>().ok()?)),
            None => (name, None),
        };
        let field = self.fields.iter().find(|field| field.name == base)?;
        match (field.array_len, index) {
            (Some(len), index) => {
                let index = index.unwrap_or(0);
                (index < len).then(|| BlockSlot {
                    offset: field.offset + index * field.stride,
                    ty: field.ty,
                    elements: len - index,
                    stride: field.stride,
                })
            }
            (None, None) => Some(BlockSlot {
                offset: field.offset,
                ty: field.ty,
                elements: 1,
                stride: field.stride,
            }),
            (None, Some(_)) => None,
        }
    }
}

/// Places `members` from `cursor` on, prefixing leaf names with `prefix`.
/// Returns the end of the last member.
fn lay_out(fields: &mut Vec<FieldLayout>, prefix: &str, members: &[Declaration], mut cursor: u32) -> u32 {
    for member in members {
        let path = format!("{prefix}{}", member.name);
        cursor = match &member.ty {
            ValueType::Basic(ty) => {
                let (size, align) = element_extent(*ty);
                let (align, stride, total) = match member.array_len {
                    Some(len) => {
                        let stride = round_up(size, VEC4_ALIGN);
                        (VEC4_ALIGN, stride, stride * len)
                    }
                    None => (align, size, size),
                };
                let offset = round_up(cursor, align);
                fields.push(FieldLayout {
                    name: path,
                    ty: *ty,
                    offset,
                    array_len: member.array_len,
                    stride,
                });
                offset + total
            }
            ValueType::Struct(def) => {
                let size = struct_size(def);
                let offset = round_up(cursor, VEC4_ALIGN);
                match member.array_len {
                    Some(len) => {
                        for index in 0..len {
                            let element = format!("{path}[{index}].");
                            lay_out(fields, &element, &def.fields, offset + index * size);
                        }
                    }
                    None => {
                        lay_out(fields, &format!("{path}."), &def.fields, offset);
                    }
                }
                offset + size * member.array_len.unwrap_or(1)
            }
        };
    }
    cursor
}

/// Structs align to a vec4 and pad their size to one.
fn struct_size(def: &StructType) -> u32 {
    let mut scratch = Vec::new();
    round_up(lay_out(&mut scratch, "", &def.fields, 0), VEC4_ALIGN)
}

/// Writes the drawing surface size into the leading vec2.
pub(crate) fn write_viewport(staging: &mut [u8], width: u32, height: u32) {
    let viewport = [width as f32, height as f32];
    staging[..8].copy_from_slice(cast_slice(&viewport));
}

/// Encodes `data` at `slot`. Extra components are dropped; missing ones keep
/// their previous contents. Returns the number of components written.
pub(crate) fn write_uniform(staging: &mut [u8], slot: BlockSlot, data: &UniformData) -> usize {
    let values: Vec<f32> = match data {
        UniformData::Int(value) => vec![*value as f32],
        UniformData::Sampler(_) | UniformData::SamplerArray(_) => return 0,
        other => other.components().to_vec(),
    };

    let (columns, rows) = slot.ty.shape();
    let column_stride = if columns > 1 { VEC4_ALIGN } else { rows * 4 };
    let mut written = 0;
    let mut values = values.into_iter();
    'elements: for element in 0..slot.elements {
        let base = slot.offset + element * slot.stride;
        for column in 0..columns {
            for row in 0..rows {
                let Some(value) = values.next() else {
                    break 'elements;
                };
                let at = (base + column * column_stride + row * 4) as usize;
                let Some(target) = staging.get_mut(at..at + 4) else {
                    break 'elements;
                };
                if slot.ty.is_integer() {
                    target.copy_from_slice(&(value as i32).to_ne_bytes());
                } else {
                    target.copy_from_slice(&value.to_ne_bytes());
                }
                written += 1;
            }
        }
    }
    written
}
