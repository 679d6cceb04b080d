//! GLSL ES 1.0 style sources rewritten as Vulkan GLSL 450 for naga.
//!
//! Loose `uniform`, `attribute` and `varying` declarations are lifted out of
//! the user source (their text is blanked so line numbers survive) and
//! re-emitted in a generated header:
//!
//! - non-sampler uniforms become members of one std140 block at set 0,
//!   binding 0, reached through `#define name canvas_uniforms._name`;
//! - top-level `struct` definitions move ahead of the block so struct
//!   uniforms (and arrays of them) can live in it;
//! - each `sampler2D` becomes a texture/sampler pair at set 1 wrapped in a
//!   `sampler2D(...)` macro, mirroring texture units. Elements of a sampler
//!   array get a pair each and `name[i]` is rewritten to the element macro,
//!   so indices must be integer literals;
//! - `gl_FragColor` maps to an output variable and `gl_FragCoord` is flipped
//!   to a bottom-left origin using the viewport stored in the block.

use std::borrow::Cow;
use std::fmt::Write as _;

use wgpu::naga;

use crate::device::{AttributeBinding, StageKind};

/// Name of the std140 block instance in generated sources.
pub(crate) const BLOCK_INSTANCE: &str = "canvas_uniforms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum GlslType {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    BVec2,
    BVec3,
    BVec4,
    Mat2,
    Mat3,
    Mat4,
    Sampler2D,
}

impl GlslType {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "float" => GlslType::Float,
            "int" => GlslType::Int,
            "bool" => GlslType::Bool,
            "vec2" => GlslType::Vec2,
            "vec3" => GlslType::Vec3,
            "vec4" => GlslType::Vec4,
            "ivec2" => GlslType::IVec2,
            "ivec3" => GlslType::IVec3,
            "ivec4" => GlslType::IVec4,
            "bvec2" => GlslType::BVec2,
            "bvec3" => GlslType::BVec3,
            "bvec4" => GlslType::BVec4,
            "mat2" => GlslType::Mat2,
            "mat3" => GlslType::Mat3,
            "mat4" => GlslType::Mat4,
            "sampler2D" => GlslType::Sampler2D,
            _ => return None,
        })
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            GlslType::Float => "float",
            GlslType::Int => "int",
            GlslType::Bool => "bool",
            GlslType::Vec2 => "vec2",
            GlslType::Vec3 => "vec3",
            GlslType::Vec4 => "vec4",
            GlslType::IVec2 => "ivec2",
            GlslType::IVec3 => "ivec3",
            GlslType::IVec4 => "ivec4",
            GlslType::BVec2 => "bvec2",
            GlslType::BVec3 => "bvec3",
            GlslType::BVec4 => "bvec4",
            GlslType::Mat2 => "mat2",
            GlslType::Mat3 => "mat3",
            GlslType::Mat4 => "mat4",
            GlslType::Sampler2D => "sampler2D",
        }
    }

    /// Type stored in the uniform block; booleans live in integers.
    pub(crate) fn block_type(self) -> &'static str {
        match self {
            GlslType::Bool => "int",
            GlslType::BVec2 => "ivec2",
            GlslType::BVec3 => "ivec3",
            GlslType::BVec4 => "ivec4",
            other => other.as_str(),
        }
    }

    /// Whether values are stored as 32-bit integers.
    pub(crate) fn is_integer(self) -> bool {
        matches!(
            self,
            GlslType::Int
                | GlslType::Bool
                | GlslType::IVec2
                | GlslType::IVec3
                | GlslType::IVec4
                | GlslType::BVec2
                | GlslType::BVec3
                | GlslType::BVec4
        )
    }

    fn is_boolean(self) -> bool {
        matches!(
            self,
            GlslType::Bool | GlslType::BVec2 | GlslType::BVec3 | GlslType::BVec4
        )
    }

    /// `(columns, rows)`; scalars and vectors have one column.
    pub(crate) fn shape(self) -> (u32, u32) {
        match self {
            GlslType::Float | GlslType::Int | GlslType::Bool | GlslType::Sampler2D => (1, 1),
            GlslType::Vec2 | GlslType::IVec2 | GlslType::BVec2 => (1, 2),
            GlslType::Vec3 | GlslType::IVec3 | GlslType::BVec3 => (1, 3),
            GlslType::Vec4 | GlslType::IVec4 | GlslType::BVec4 => (1, 4),
            GlslType::Mat2 => (2, 2),
            GlslType::Mat3 => (3, 3),
            GlslType::Mat4 => (4, 4),
        }
    }
}

/// A `struct` declared at the top level of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StructType {
    pub name: String,
    pub fields: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ValueType {
    Basic(GlslType),
    Struct(StructType),
}

impl ValueType {
    pub(crate) fn name(&self) -> &str {
        match self {
            ValueType::Basic(ty) => ty.as_str(),
            ValueType::Struct(def) => &def.name,
        }
    }

    fn block_name(&self) -> &str {
        match self {
            ValueType::Basic(ty) => ty.block_type(),
            ValueType::Struct(def) => &def.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Declaration {
    pub name: String,
    pub ty: ValueType,
    pub array_len: Option<u32>,
}

impl Declaration {
    fn array_suffix(&self) -> String {
        self.array_len.map(|len| format!("[{len}]")).unwrap_or_default()
    }
}

/// A stage with its interface declarations lifted out.
#[derive(Debug, Clone)]
pub(crate) struct StageInterface {
    pub kind: StageKind,
    pub structs: Vec<StructType>,
    /// Non-uniform variables declared together with a struct definition.
    pub globals: Vec<String>,
    pub uniforms: Vec<Declaration>,
    /// Sampler names; array elements appear as `name[i]`.
    pub samplers: Vec<String>,
    pub sampler_arrays: Vec<(String, u32)>,
    pub attributes: Vec<Declaration>,
    pub varyings: Vec<Declaration>,
    /// Original source with the lifted declarations blanked out.
    pub body: String,
}

/// Bindings shared by both stages of a program.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProgramInterface {
    pub structs: Vec<StructType>,
    pub uniforms: Vec<Declaration>,
    pub samplers: Vec<String>,
    pub varyings: Vec<Declaration>,
    pub attributes: Vec<(Declaration, u32)>,
}

/// Generated source plus how many lines precede the user's first line.
#[derive(Debug, Clone)]
pub(crate) struct GeneratedStage {
    pub source: String,
    pub header_lines: usize,
}

fn error_at(line: usize, message: impl AsRef<str>) -> String {
    format!("ERROR: 0:{line}: {}", message.as_ref())
}

/// Replaces comment characters with spaces, keeping byte offsets and line
/// breaks intact.
fn blank_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let blank = |out: &mut String, ch: char| {
        if ch == '\n' {
            out.push('\n');
        } else {
            out.extend(std::iter::repeat(' ').take(ch.len_utf8()));
        }
    };
    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        match (ch, next) {
            ('/', Some('/')) => {
                blank(&mut out, ch);
                while let Some(&inner) = chars.peek() {
                    if inner == '\n' {
                        break;
                    }
                    blank(&mut out, inner);
                    chars.next();
                }
            }
            ('/', Some('*')) => {
                blank(&mut out, ch);
                let mut previous = ' ';
                for inner in chars.by_ref() {
                    blank(&mut out, inner);
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Identifier a sampler is reached through in generated sources; element
/// `name[i]` of a sampler array becomes `canvas_name_i`.
pub(crate) fn sampler_macro(name: &str) -> Cow<'_, str> {
    match name.strip_suffix(']').and_then(|rest| rest.split_once('[')) {
        Some((base, index)) => Cow::Owned(format!("canvas_{base}_{index}")),
        None => Cow::Borrowed(name),
    }
}

fn sampler_base(name: &str) -> &str {
    name.split_once('[').map_or(name, |(base, _)| base)
}

/// `struct Name`, `uniform struct Name` or the block form `uniform Name`.
fn is_struct_head(text: &str) -> bool {
    matches!(text.split_whitespace().next(), Some("struct" | "uniform"))
}

/// Lifts interface declarations out of `source`.
pub(crate) fn parse_stage(kind: StageKind, source: &str) -> Result<StageInterface, String> {
    let scan = blank_comments(source);
    let mut interface = StageInterface {
        kind,
        structs: Vec::new(),
        globals: Vec::new(),
        uniforms: Vec::new(),
        samplers: Vec::new(),
        sampler_arrays: Vec::new(),
        attributes: Vec::new(),
        varyings: Vec::new(),
        body: String::new(),
    };
    let mut blanked: Vec<(usize, usize)> = Vec::new();

    let mut depth = 0usize;
    let mut start: Option<usize> = None;
    // Opening and closing brace of a struct definition awaiting its `;`.
    let mut pending: Option<(usize, Option<usize>)> = None;
    let mut offset = 0;
    for line in scan.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            if trimmed.starts_with("#version") {
                blanked.push((line_start, line_start + line.trim_end().len()));
            }
            continue;
        }
        for (index, ch) in line.char_indices() {
            let at = line_start + index;
            match ch {
                '{' => {
                    if depth == 0 {
                        match start {
                            Some(begin) if is_struct_head(&scan[begin..at]) => pending = Some((at, None)),
                            _ => start = None,
                        }
                    }
                    depth += 1;
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        match pending.as_mut() {
                            Some((_, close)) => *close = Some(at),
                            None => start = None,
                        }
                    }
                }
                ';' if depth == 0 => {
                    let Some(begin) = start.take() else {
                        continue;
                    };
                    let line = line_of(&scan, begin);
                    match pending.take() {
                        Some((open, Some(close))) => {
                            lift_struct(
                                &scan[begin..open],
                                &scan[open + 1..close],
                                &scan[close + 1..at],
                                line,
                                &mut interface,
                            )?;
                            blanked.push((begin, at + 1));
                        }
                        _ => {
                            if lift_declaration(kind, &scan[begin..at], line, &mut interface)? {
                                blanked.push((begin, at + 1));
                            }
                        }
                    }
                }
                ch if depth == 0 && start.is_none() && !ch.is_whitespace() => start = Some(at),
                _ => {}
            }
        }
    }

    let mut body = source.to_owned();
    for (begin, end) in blanked {
        let replacement: String = source[begin..end]
            .chars()
            .map(|ch| if ch == '\n' { "\n".to_owned() } else { " ".repeat(ch.len_utf8()) })
            .collect();
        body.replace_range(begin..end, &replacement);
    }
    interface.body = index_sampler_arrays(&body, &interface.sampler_arrays)?;
    Ok(interface)
}

/// Rewrites `name[i]` for every sampler array to the macro of element `i`.
fn index_sampler_arrays(body: &str, arrays: &[(String, u32)]) -> Result<String, String> {
    if arrays.is_empty() {
        return Ok(body.to_owned());
    }
    let scan = blank_comments(body);
    let mut edits: Vec<(usize, usize, String)> = Vec::new();
    for (name, len) in arrays {
        for (at, _) in scan.match_indices(name.as_str()) {
            let end = at + name.len();
            let before = scan[..at].chars().next_back();
            let after = scan[end..].chars().next();
            if before.is_some_and(is_ident_char) || after.is_some_and(is_ident_char) {
                continue;
            }
            let line = line_of(&scan, at);
            let rest = &scan[end..];
            let open = rest.len() - rest.trim_start().len();
            let close = rest[open..]
                .starts_with('[')
                .then(|| rest[open..].find(']'))
                .flatten()
                .ok_or_else(|| error_at(line, format!("'{name}' : sampler arrays must be indexed")))?;
            let index: u32 = rest[open + 1..open + close].trim().parse().map_err(|_| {
                error_at(line, format!("'{name}' : sampler array index must be an integer literal"))
            })?;
            if index >= *len {
                return Err(error_at(line, format!("'{name}' : index {index} out of range")));
            }
            let span_end = end + open + close + 1;
            let newlines = "\n".repeat(scan[at..span_end].matches('\n').count());
            let element = format!("{name}[{index}]");
            edits.push((at, span_end, format!("{}{newlines}", sampler_macro(&element))));
        }
    }
    edits.sort_by_key(|(at, _, _)| *at);
    let mut out = body.to_owned();
    for (at, end, replacement) in edits.into_iter().rev() {
        out.replace_range(at..end, &replacement);
    }
    Ok(out)
}

/// Records a `struct` definition and whatever it declares. A block written
/// as `uniform Name { ... };` without an instance name declares its members
/// as plain uniforms.
fn lift_struct(
    head: &str,
    members: &str,
    trailing: &str,
    line: usize,
    interface: &mut StageInterface,
) -> Result<(), String> {
    let words: Vec<&str> = head.split_whitespace().collect();
    let (uniform, block, name) = match words.as_slice() {
        ["struct", name] => (false, false, *name),
        ["uniform", "struct", name] => (true, false, *name),
        ["uniform", name] => (true, true, *name),
        _ => return Err(error_at(line, "'struct' : anonymous structs are not supported")),
    };
    if parse_declarator(name) != Some((name, None)) {
        return Err(error_at(line, format!("'{name}' : malformed struct name")));
    }
    if interface.structs.iter().any(|known| known.name == name) {
        return Err(error_at(line, format!("'{name}' : struct redefinition")));
    }

    let mut fields = Vec::new();
    for member in members.split(';') {
        let spaced = member.replace(',', " , ");
        let mut words = spaced
            .split_whitespace()
            .skip_while(|word| matches!(*word, "lowp" | "mediump" | "highp"));
        let Some(type_word) = words.next() else {
            continue;
        };
        let ty = match resolve_type(type_word, interface) {
            Some(ValueType::Basic(GlslType::Sampler2D)) => {
                return Err(error_at(line, format!("'{name}' : samplers inside structs are not supported")))
            }
            Some(ValueType::Basic(ty)) if ty.is_boolean() => {
                return Err(error_at(line, format!("'{name}' : bool struct members are not supported")))
            }
            Some(ty) => ty,
            None => return Err(error_at(line, format!("'{type_word}' : unsupported struct member type"))),
        };
        let declarators = parse_declarators(words, line, type_word)?;
        fields.extend(declarators.into_iter().map(|(field, array_len)| Declaration {
            name: field,
            ty: ty.clone(),
            array_len,
        }));
    }
    if fields.is_empty() {
        return Err(error_at(line, format!("'{name}' : struct has no members")));
    }
    let def = StructType {
        name: name.to_owned(),
        fields,
    };

    let spaced = trailing.replace(',', " , ");
    let declarators = parse_declarators(spaced.split_whitespace(), line, name)?;
    if block && declarators.is_empty() {
        interface.uniforms.extend(def.fields);
        return Ok(());
    }
    if uniform && declarators.is_empty() {
        return Err(error_at(line, "'uniform' : missing name"));
    }
    for (variable, array_len) in declarators {
        if uniform {
            interface.uniforms.push(Declaration {
                name: variable,
                ty: ValueType::Struct(def.clone()),
                array_len,
            });
        } else {
            let suffix = array_len.map(|len| format!("[{len}]")).unwrap_or_default();
            interface.globals.push(format!("{name} {variable}{suffix};"));
        }
    }
    interface.structs.push(def);
    Ok(())
}

fn resolve_type(word: &str, interface: &StageInterface) -> Option<ValueType> {
    match GlslType::parse(word) {
        Some(ty) => Some(ValueType::Basic(ty)),
        None => interface
            .structs
            .iter()
            .find(|def| def.name == word)
            .map(|def| ValueType::Struct(def.clone())),
    }
}

fn parse_declarators<'a>(
    words: impl Iterator<Item = &'a str>,
    line: usize,
    context: &str,
) -> Result<Vec<(String, Option<u32>)>, String> {
    words
        .filter(|word| *word != ",")
        .map(|declarator| {
            parse_declarator(declarator)
                .map(|(name, array_len)| (name.to_owned(), array_len))
                .ok_or_else(|| error_at(line, format!("'{context}' : malformed declarator '{declarator}'")))
        })
        .collect()
}

/// Records the declaration in `statement` if it is part of the stage
/// interface. Returns whether the statement should be removed.
fn lift_declaration(
    kind: StageKind,
    statement: &str,
    line: usize,
    interface: &mut StageInterface,
) -> Result<bool, String> {
    let spaced = statement.replace(',', " , ");
    let mut words = spaced.split_whitespace();
    let Some(qualifier) = words.next() else {
        return Ok(false);
    };
    if qualifier == "precision" {
        return Ok(true);
    }
    if !matches!(qualifier, "uniform" | "attribute" | "varying") {
        return Ok(false);
    }
    if qualifier == "attribute" && kind == StageKind::Fragment {
        return Err(error_at(line, "'attribute' : not supported in fragment shaders"));
    }

    let mut words = words.skip_while(|word| matches!(*word, "lowp" | "mediump" | "highp"));
    let type_word = words
        .next()
        .ok_or_else(|| error_at(line, format!("'{qualifier}' : missing type")))?;
    let ty = match resolve_type(type_word, interface) {
        Some(ty @ ValueType::Basic(_)) => ty,
        Some(ty @ ValueType::Struct(_)) if qualifier == "uniform" => ty,
        _ if type_word == "samplerCube" => {
            return Err(error_at(line, "'samplerCube' : cube map samplers are not supported"))
        }
        _ => return Err(error_at(line, format!("'{type_word}' : unsupported {qualifier} type"))),
    };

    let declarators = parse_declarators(words, line, qualifier)?;
    if declarators.is_empty() {
        return Err(error_at(line, format!("'{qualifier}' : missing name")));
    }
    for (name, array_len) in declarators {
        match (qualifier, &ty) {
            ("uniform", ValueType::Basic(GlslType::Sampler2D)) => match array_len {
                Some(len) => {
                    interface
                        .samplers
                        .extend((0..len).map(|index| format!("{name}[{index}]")));
                    interface.sampler_arrays.push((name, len));
                }
                None => interface.samplers.push(name),
            },
            ("uniform", ValueType::Basic(basic)) if basic.is_boolean() && array_len.is_some() => {
                return Err(error_at(line, format!("'{name}' : bool arrays are not supported")));
            }
            _ => {
                let declaration = Declaration {
                    name,
                    ty: ty.clone(),
                    array_len,
                };
                match qualifier {
                    "uniform" => interface.uniforms.push(declaration),
                    "attribute" => interface.attributes.push(declaration),
                    _ => interface.varyings.push(declaration),
                }
            }
        }
    }
    Ok(true)
}

fn parse_declarator(word: &str) -> Option<(&str, Option<u32>)> {
    let is_ident = |name: &str| {
        !name.is_empty()
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
            && !name.starts_with(|ch: char| ch.is_ascii_digit())
    };
    match word.split_once('[') {
        None => is_ident(word).then_some((word, None)),
        Some((name, rest)) => {
            let len = rest.strip_suffix(']')?.trim().parse().ok()?;
            is_ident(name).then_some((name, Some(len)))
        }
    }
}

/// Interface of a stage compiled on its own, used to validate it before
/// linking.
pub(crate) fn standalone_interface(stage: &StageInterface) -> ProgramInterface {
    ProgramInterface {
        structs: stage.structs.clone(),
        uniforms: stage.uniforms.clone(),
        samplers: stage.samplers.clone(),
        varyings: stage.varyings.clone(),
        attributes: stage
            .attributes
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, attribute)| (attribute, index as u32))
            .collect(),
    }
}

fn link_error(message: impl AsRef<str>) -> String {
    format!("ERROR: Linking failed: {}", message.as_ref())
}

/// Merges the interfaces of a vertex and fragment stage into the bindings of
/// one program.
pub(crate) fn link_interface(
    vertex: &StageInterface,
    fragment: &StageInterface,
    hints: &[AttributeBinding],
) -> Result<ProgramInterface, String> {
    let mut program = ProgramInterface::default();

    for def in vertex.structs.iter().chain(&fragment.structs) {
        match program.structs.iter().find(|known| known.name == def.name) {
            Some(known) if known != def => {
                return Err(link_error(format!(
                    "struct '{}' is defined differently in each stage",
                    def.name
                )))
            }
            Some(_) => {}
            None => program.structs.push(def.clone()),
        }
    }
    for uniform in vertex.uniforms.iter().chain(&fragment.uniforms) {
        match program.uniforms.iter().find(|known| known.name == uniform.name) {
            Some(known) if known != uniform => {
                return Err(link_error(format!(
                    "uniform '{}' declared as both {} and {}",
                    uniform.name,
                    known.ty.name(),
                    uniform.ty.name()
                )))
            }
            Some(_) => {}
            None => program.uniforms.push(uniform.clone()),
        }
    }
    for sampler in vertex.samplers.iter().chain(&fragment.samplers) {
        if program
            .uniforms
            .iter()
            .any(|uniform| uniform.name == sampler_base(sampler))
        {
            return Err(link_error(format!(
                "uniform '{sampler}' declared with conflicting types"
            )));
        }
        if !program.samplers.contains(sampler) {
            program.samplers.push(sampler.clone());
        }
    }

    for varying in &fragment.varyings {
        match vertex.varyings.iter().find(|own| own.name == varying.name) {
            Some(written) if written == varying => {}
            Some(written) => {
                return Err(link_error(format!(
                    "varying '{}' is {} in the vertex shader and {} in the fragment shader",
                    varying.name,
                    written.ty.name(),
                    varying.ty.name()
                )))
            }
            None => {
                return Err(link_error(format!(
                    "varying '{}' is not written by the vertex shader",
                    varying.name
                )))
            }
        }
    }
    program.varyings = vertex.varyings.clone();

    for attribute in &vertex.attributes {
        let hint = hints
            .iter()
            .find(|hint| hint.name == attribute.name)
            .ok_or_else(|| {
                link_error(format!("attribute '{}' has no vertex data", attribute.name))
            })?;
        program.attributes.push((attribute.clone(), hint.location));
    }

    Ok(program)
}

/// Emits the complete Vulkan GLSL source of `stage` against `program`.
pub(crate) fn emit_stage(stage: &StageInterface, program: &ProgramInterface) -> GeneratedStage {
    let mut header = String::from("#version 450\n");
    for def in &program.structs {
        let _ = writeln!(header, "struct {} {{", def.name);
        for field in &def.fields {
            let _ = writeln!(header, "    {} {}{};", field.ty.name(), field.name, field.array_suffix());
        }
        header.push_str("};\n");
    }
    for global in &stage.globals {
        let _ = writeln!(header, "{global}");
    }
    header.push_str("layout(std140, set = 0, binding = 0) uniform CanvasUniforms {\n");
    header.push_str("    vec2 _canvas_viewport;\n");
    for uniform in &program.uniforms {
        let _ = writeln!(
            header,
            "    {} _{}{};",
            uniform.ty.block_name(),
            uniform.name,
            uniform.array_suffix()
        );
    }
    let _ = writeln!(header, "}} {BLOCK_INSTANCE};");
    for uniform in &program.uniforms {
        let access = format!("{BLOCK_INSTANCE}._{}", uniform.name);
        let _ = match uniform.ty {
            ValueType::Basic(GlslType::Bool) => {
                writeln!(header, "#define {} ({access} != 0)", uniform.name)
            }
            ValueType::Basic(GlslType::BVec2 | GlslType::BVec3 | GlslType::BVec4) => {
                writeln!(header, "#define {} {}({access})", uniform.name, uniform.ty.name())
            }
            _ => writeln!(header, "#define {} {access}", uniform.name),
        };
    }
    for (index, sampler) in program.samplers.iter().enumerate() {
        let _ = writeln!(
            header,
            "layout(set = 1, binding = {texture}) uniform texture2D canvas_texture_{index};\n\
             layout(set = 1, binding = {sampler_binding}) uniform sampler canvas_sampler_{index};\n\
             #define {name} sampler2D(canvas_texture_{index}, canvas_sampler_{index})",
            name = sampler_macro(sampler),
            texture = index * 2,
            sampler_binding = index * 2 + 1,
        );
    }
    header.push_str("#define texture2D texture\n");

    match stage.kind {
        StageKind::Vertex => {
            for (attribute, location) in &program.attributes {
                if stage.attributes.iter().any(|own| own.name == attribute.name) {
                    let _ = writeln!(
                        header,
                        "layout(location = {location}) in {} {};",
                        attribute.ty.name(),
                        attribute.name
                    );
                }
            }
            for (location, varying) in program.varyings.iter().enumerate() {
                let _ = writeln!(
                    header,
                    "layout(location = {location}) out {} {}{};",
                    varying.ty.name(),
                    varying.name,
                    varying.array_suffix()
                );
            }
        }
        StageKind::Fragment => {
            for (location, varying) in program.varyings.iter().enumerate() {
                if stage.varyings.iter().any(|own| own.name == varying.name) {
                    let _ = writeln!(
                        header,
                        "layout(location = {location}) in {} {}{};",
                        varying.ty.name(),
                        varying.name,
                        varying.array_suffix()
                    );
                }
            }
            header.push_str(
                "layout(location = 0) out vec4 canvas_frag_color;\n\
                 #define gl_FragColor canvas_frag_color\n\
                 vec4 canvas_frag_coord;\n\
                 #define gl_FragCoord canvas_frag_coord\n\
                 #define main canvas_user_main\n",
            );
        }
    }

    let header_lines = header.matches('\n').count() + 1;
    let mut source = header;
    source.push_str("#line 1\n");
    source.push_str(&stage.body);
    if !source.ends_with('\n') {
        source.push('\n');
    }
    if stage.kind == StageKind::Fragment {
        source.push_str(FRAGMENT_FOOTER);
    }
    GeneratedStage {
        source,
        header_lines,
    }
}

const FRAGMENT_FOOTER: &str = "#undef main
void main() {
#undef gl_FragCoord
    canvas_frag_coord = vec4(
        gl_FragCoord.x,
        canvas_uniforms._canvas_viewport.y - gl_FragCoord.y,
        gl_FragCoord.z,
        gl_FragCoord.w);
#define gl_FragCoord canvas_frag_coord
    canvas_frag_color = vec4(0.0);
    canvas_user_main();
}
";

pub(crate) fn naga_stage(kind: StageKind) -> naga::ShaderStage {
    match kind {
        StageKind::Vertex => naga::ShaderStage::Vertex,
        StageKind::Fragment => naga::ShaderStage::Fragment,
    }
}

/// Parses and validates a generated stage with naga, reporting errors
/// against the user's line numbers.
pub(crate) fn validate(kind: StageKind, generated: &GeneratedStage) -> Result<(), String> {
    let options = naga::front::glsl::Options::from(naga_stage(kind));
    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&options, &generated.source)
        .map_err(|errors| {
            errors
                .errors
                .iter()
                .map(|error| {
                    let line = error.meta.location(&generated.source).line_number as usize;
                    error_at(user_line(line, generated.header_lines), error.kind.to_string())
                })
                .collect::<Vec<_>>()
                .join("\n")
        })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|error| error.emit_to_string(&generated.source))?;
    Ok(())
}

fn user_line(line: usize, header_lines: usize) -> usize {
    line.saturating_sub(header_lines).max(1)
}

pub(crate) fn shader_source(generated: &GeneratedStage, kind: StageKind) -> wgpu::ShaderSource<'_> {
    wgpu::ShaderSource::Glsl {
        shader: Cow::Borrowed(generated.source.as_str()),
        stage: naga_stage(kind),
        defines: &[],
    }
}
