//! GPU-free backend that applies GL-like compile and link rules and records
//! every call, for tests and `--headless` runs.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::device::{
    AttributeBinding, CapabilityLevel, ContextError, ContextOptions, DeviceError, DeviceFactory,
    GraphicsDevice, ProgramHandle, StageHandle, StageKind, TextureHandle, UniformLocation,
};
use crate::target::{RenderTarget, SurfaceSize};
use crate::textures::{TextureImage, TextureOptions};
use crate::uniforms::usage::count_token;
use crate::uniforms::UniformData;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    pub program: ProgramHandle,
    pub name: String,
    pub data: UniformData,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRecord {
    pub program: ProgramHandle,
    pub vertex_count: u32,
    pub clear_color: [f32; 4],
    pub surface: SurfaceSize,
}

#[derive(Debug, Clone)]
struct StageRecord {
    kind: StageKind,
    source: String,
}

#[derive(Debug, Clone)]
struct ProgramRecord {
    sources: Vec<String>,
    attributes: Vec<AttributeBinding>,
}

#[derive(Debug, Clone)]
struct TextureRecord {
    label: String,
    writes: usize,
    contents: Option<TextureImage>,
    options: Option<TextureOptions>,
}

#[derive(Debug, Clone)]
pub struct HeadlessDevice {
    next_id: u32,
    stages: HashMap<StageHandle, StageRecord>,
    programs: HashMap<ProgramHandle, ProgramRecord>,
    locations: HashMap<(ProgramHandle, String), UniformLocation>,
    location_names: HashMap<UniformLocation, String>,
    location_lookups: usize,
    uploads: Vec<UploadRecord>,
    textures: HashMap<TextureHandle, TextureRecord>,
    textures_created: usize,
    bound: BTreeMap<u32, TextureHandle>,
    geometry: Option<(Vec<[f32; 2]>, Vec<[f32; 2]>)>,
    surface: SurfaceSize,
    clear_color: [f32; 4],
    draws: Vec<DrawRecord>,
    failing_draws: usize,
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            next_id: 1,
            stages: HashMap::new(),
            programs: HashMap::new(),
            locations: HashMap::new(),
            location_names: HashMap::new(),
            location_lookups: 0,
            uploads: Vec::new(),
            textures: HashMap::new(),
            textures_created: 0,
            bound: BTreeMap::new(),
            geometry: None,
            surface: SurfaceSize::new(width, height),
            clear_color: [0.0; 4],
            draws: Vec::new(),
            failing_draws: 0,
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Makes the next `count` draws fail as if the surface was lost.
    pub fn fail_next_draws(&mut self, count: usize) {
        self.failing_draws = count;
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn uploads(&self) -> &[UploadRecord] {
        &self.uploads
    }

    /// `(program, data)` for every upload to `name`, oldest first.
    pub fn uploads_for(&self, name: &str) -> Vec<(ProgramHandle, UniformData)> {
        self.uploads
            .iter()
            .filter(|upload| upload.name == name)
            .map(|upload| (upload.program, upload.data.clone()))
            .collect()
    }

    pub fn last_upload(&self, name: &str) -> Option<&UniformData> {
        self.uploads
            .iter()
            .rev()
            .find(|upload| upload.name == name)
            .map(|upload| &upload.data)
    }

    pub fn location_lookups(&self) -> usize {
        self.location_lookups
    }

    pub fn live_stages(&self) -> usize {
        self.stages.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn is_program_live(&self, program: ProgramHandle) -> bool {
        self.programs.contains_key(&program)
    }

    /// Attribute hints the program was linked with.
    pub fn program_attributes(&self, program: ProgramHandle) -> Option<&[AttributeBinding]> {
        self.programs
            .get(&program)
            .map(|record| record.attributes.as_slice())
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_label(&self, texture: TextureHandle) -> Option<&str> {
        self.textures.get(&texture).map(|record| record.label.as_str())
    }

    pub fn texture_writes(&self, texture: TextureHandle) -> usize {
        self.textures.get(&texture).map_or(0, |record| record.writes)
    }

    pub fn texture_contents(&self, texture: TextureHandle) -> Option<&TextureImage> {
        self.textures
            .get(&texture)
            .and_then(|record| record.contents.as_ref())
    }

    pub fn texture_options(&self, texture: TextureHandle) -> Option<&TextureOptions> {
        self.textures
            .get(&texture)
            .and_then(|record| record.options.as_ref())
    }

    pub fn bound_textures(&self) -> &BTreeMap<u32, TextureHandle> {
        &self.bound
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn surface_size(&self) -> SurfaceSize {
        self.surface
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn compile_stage(&mut self, kind: StageKind, source: &str) -> Result<StageHandle, String> {
        check_source(source)?;
        let stage = StageHandle::new(self.allocate());
        self.stages.insert(
            stage,
            StageRecord {
                kind,
                source: source.to_owned(),
            },
        );
        Ok(stage)
    }

    fn release_stage(&mut self, stage: StageHandle) {
        self.stages.remove(&stage);
    }

    fn link_program(
        &mut self,
        stages: &[StageHandle],
        attributes: &[AttributeBinding],
    ) -> Result<ProgramHandle, String> {
        let mut vertex = Vec::new();
        let mut fragment = Vec::new();
        for stage in stages {
            let record = self
                .stages
                .get(stage)
                .ok_or_else(|| format!("ERROR: Linking failed: unknown stage {}", stage.raw()))?;
            match record.kind {
                StageKind::Vertex => vertex.push(record),
                StageKind::Fragment => fragment.push(record),
            }
        }
        let (vertex, fragment) = match (vertex.as_slice(), fragment.as_slice()) {
            ([vertex], [fragment]) => (*vertex, *fragment),
            _ => {
                return Err(format!(
                    "ERROR: Linking failed: expected one vertex and one fragment stage, got {} and {}",
                    vertex.len(),
                    fragment.len()
                ))
            }
        };

        let written = declared_varyings(&vertex.source);
        for name in declared_varyings(&fragment.source) {
            if !written.contains(&name) {
                return Err(format!(
                    "ERROR: Linking failed: varying '{name}' is not declared in the vertex shader"
                ));
            }
        }

        let sources = vec![vertex.source.clone(), fragment.source.clone()];
        let program = ProgramHandle::new(self.allocate());
        self.programs.insert(
            program,
            ProgramRecord {
                sources,
                attributes: attributes.to_vec(),
            },
        );
        Ok(program)
    }

    fn release_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.locations.retain(|(owner, _), _| *owner != program);
    }

    fn upload_geometry(&mut self, positions: &[[f32; 2]], texcoords: &[[f32; 2]]) {
        self.geometry = Some((positions.to_vec(), texcoords.to_vec()));
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        self.location_lookups += 1;
        if let Some(location) = self.locations.get(&(program, name.to_owned())) {
            return Some(*location);
        }
        let record = self.programs.get(&program)?;
        let base = name.split(['.', '[']).next().unwrap_or(name);
        let active = record
            .sources
            .iter()
            .any(|source| count_token(&strip_comments(source), base) > 0);
        if !active {
            return None;
        }
        let location = UniformLocation::new(self.allocate());
        self.locations.insert((program, name.to_owned()), location);
        self.location_names.insert(location, name.to_owned());
        Some(location)
    }

    fn upload_uniform(
        &mut self,
        program: ProgramHandle,
        location: UniformLocation,
        value: &UniformData,
    ) {
        let name = self
            .location_names
            .get(&location)
            .cloned()
            .unwrap_or_else(|| format!("#{}", location.raw()));
        self.uploads.push(UploadRecord {
            program,
            name,
            data: value.clone(),
        });
    }

    fn create_texture(&mut self, label: &str) -> Result<TextureHandle, DeviceError> {
        let texture = TextureHandle::new(self.allocate());
        self.textures.insert(
            texture,
            TextureRecord {
                label: label.to_owned(),
                writes: 0,
                contents: None,
                options: None,
            },
        );
        self.textures_created += 1;
        Ok(texture)
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        image: &TextureImage,
        options: &TextureOptions,
    ) -> Result<(), DeviceError> {
        let record = self
            .textures
            .get_mut(&texture)
            .ok_or(DeviceError::UnknownTexture(texture))?;
        record.writes += 1;
        record.contents = Some(image.clone());
        record.options = Some(options.clone());
        Ok(())
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
        self.bound.retain(|_, bound| *bound != texture);
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.bound.insert(unit, texture);
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = SurfaceSize::new(width, height);
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    fn draw(&mut self, program: ProgramHandle, vertex_count: u32) -> Result<(), DeviceError> {
        if !self.programs.contains_key(&program) {
            return Err(DeviceError::UnknownProgram(program));
        }
        if self.geometry.is_none() {
            return Err(DeviceError::MissingGeometry);
        }
        if self.failing_draws > 0 {
            self.failing_draws -= 1;
            return Err(DeviceError::SurfaceLost);
        }
        self.draws.push(DrawRecord {
            program,
            vertex_count,
            clear_color: self.clear_color,
            surface: self.surface,
        });
        Ok(())
    }
}

/// Replaces comments with spaces, keeping line breaks so line numbers stay
/// meaningful.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        match (ch, next) {
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = ' ';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }
    out
}

fn check_source(source: &str) -> Result<(), String> {
    let stripped = strip_comments(source);
    let mut depth: i64 = 0;
    let mut last_line = 1;
    for (index, line) in stripped.lines().enumerate() {
        let number = index + 1;
        last_line = number;
        let trimmed = line.trim_start();
        if let Some(message) = trimmed.strip_prefix("#error") {
            return Err(format!("ERROR: 0:{number}: '#error' : {}", message.trim()));
        }
        for ch in line.chars() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(format!("ERROR: 0:{number}: '}}' : syntax error"));
                    }
                }
                _ => {}
            }
        }
    }
    if depth > 0 {
        return Err(format!(
            "ERROR: 0:{last_line}: '' : syntax error, unexpected end of file, missing '}}'"
        ));
    }
    let compact: String = stripped.split_whitespace().collect();
    if !compact.contains("voidmain(") {
        return Err(format!("ERROR: 0:{last_line}: '' : missing main function"));
    }
    Ok(())
}

fn declared_varyings(source: &str) -> HashSet<String> {
    let stripped = strip_comments(source);
    let mut names = HashSet::new();
    for statement in stripped.split(';') {
        let mut words = statement.split_whitespace();
        while let Some(word) = words.next() {
            if word == "varying" {
                // Skip qualifiers and the type, collect declarators.
                let rest: Vec<&str> = words.by_ref().collect();
                let declarators = rest
                    .iter()
                    .skip_while(|word| matches!(**word, "lowp" | "mediump" | "highp" | "flat"))
                    .skip(1)
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" ");
                for name in declarators.split(',') {
                    let name = name.split('[').next().unwrap_or("").trim();
                    if !name.is_empty() {
                        names.insert(name.to_owned());
                    }
                }
                break;
            }
        }
    }
    names
}

/// Hands out [`HeadlessDevice`]s, optionally refusing some capability levels.
#[derive(Debug)]
pub struct HeadlessFactory {
    size: SurfaceSize,
    rejected: Vec<CapabilityLevel>,
    attempts: RefCell<Vec<CapabilityLevel>>,
}

impl HeadlessFactory {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: SurfaceSize::new(width, height),
            rejected: Vec::new(),
            attempts: RefCell::new(Vec::new()),
        }
    }

    pub fn reject(mut self, levels: &[CapabilityLevel]) -> Self {
        self.rejected.extend_from_slice(levels);
        self
    }

    /// Rejects every level, so acquisition fails.
    pub fn unavailable() -> Self {
        Self::new(1, 1).reject(&CapabilityLevel::DESCENDING)
    }

    /// Levels tried so far, in order.
    pub fn attempts(&self) -> Vec<CapabilityLevel> {
        self.attempts.borrow().clone()
    }
}

impl DeviceFactory for HeadlessFactory {
    type Device = HeadlessDevice;

    fn create_device(
        &self,
        level: CapabilityLevel,
        _options: &ContextOptions,
    ) -> Result<HeadlessDevice, ContextError> {
        self.attempts.borrow_mut().push(level);
        if self.rejected.contains(&level) {
            return Err(ContextError::Unavailable {
                level,
                reason: "rejected by headless factory".into(),
            });
        }
        Ok(HeadlessDevice::new(self.size.width, self.size.height))
    }
}

/// In-memory [`RenderTarget`] with mutable size, visibility and pointer.
#[derive(Debug, Clone)]
pub struct HeadlessTarget {
    size: (f64, f64),
    pixel_ratio: f64,
    visible: bool,
    pointer: Option<(f64, f64)>,
    attributes: HashMap<String, String>,
}

impl HeadlessTarget {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            size: (width, height),
            pixel_ratio: 1.0,
            visible: true,
            pointer: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_pixel_ratio(mut self, ratio: f64) -> Self {
        self.pixel_ratio = ratio;
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn set_size(&mut self, width: f64, height: f64) {
        self.size = (width, height);
    }

    pub fn set_pixel_ratio(&mut self, ratio: f64) {
        self.pixel_ratio = ratio;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_pointer(&mut self, pointer: Option<(f64, f64)>) {
        self.pointer = pointer;
    }
}

impl RenderTarget for HeadlessTarget {
    fn client_size(&self) -> (f64, f64) {
        self.size
    }

    fn pixel_ratio(&self) -> f64 {
        self.pixel_ratio
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn pointer(&self) -> Option<(f64, f64)> {
        self.pointer
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ATTRIBUTE_BINDINGS;
    use crate::program::{DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER};

    #[test]
    fn compile_rejects_error_directive_with_line() {
        let mut device = HeadlessDevice::new(1, 1);
        let err = device
            .compile_stage(StageKind::Fragment, "void main(){}\n\n#error broken shader\n")
            .unwrap_err();
        assert_eq!(err, "ERROR: 0:3: '#error' : broken shader");
    }

    #[test]
    fn compile_rejects_unbalanced_braces_and_missing_main() {
        let mut device = HeadlessDevice::new(1, 1);
        assert!(device
            .compile_stage(StageKind::Fragment, "void main(){\n")
            .unwrap_err()
            .contains("missing '}'"));
        assert!(device
            .compile_stage(StageKind::Fragment, "void main(){}}\n")
            .unwrap_err()
            .contains("'}'"));
        assert!(device
            .compile_stage(StageKind::Fragment, "float f(){ return 1.0; }")
            .unwrap_err()
            .contains("missing main"));
    }

    #[test]
    fn comments_are_ignored() {
        let mut device = HeadlessDevice::new(1, 1);
        let source = "// #error not really\n/* { */ void main(){}";
        assert!(device.compile_stage(StageKind::Fragment, source).is_ok());
    }

    #[test]
    fn varyings_parse_qualifiers_and_lists() {
        let names = declared_varyings("varying highp vec2 v_a, v_b[2];\nvarying float v_c;");
        let expected: HashSet<String> = ["v_a", "v_b", "v_c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn link_records_attributes_and_resolves_locations() {
        let mut device = HeadlessDevice::new(1, 1);
        let vertex = device
            .compile_stage(StageKind::Vertex, DEFAULT_VERTEX_SHADER)
            .expect("vertex");
        let fragment = device
            .compile_stage(
                StageKind::Fragment,
                "uniform vec3 u_light_color;\nvoid main(){ gl_FragColor = vec4(u_light_color, 1.0); }",
            )
            .expect("fragment");
        let program = device
            .link_program(&[vertex, fragment], &ATTRIBUTE_BINDINGS)
            .expect("link");
        assert_eq!(device.program_attributes(program), Some(&ATTRIBUTE_BINDINGS[..]));
        assert!(device.uniform_location(program, "u_light_color").is_some());
        assert!(device.uniform_location(program, "u_light").is_none());
    }

    #[test]
    fn link_needs_one_stage_of_each_kind() {
        let mut device = HeadlessDevice::new(1, 1);
        let fragment = device
            .compile_stage(StageKind::Fragment, DEFAULT_FRAGMENT_SHADER)
            .expect("fragment");
        assert!(device.link_program(&[fragment], &ATTRIBUTE_BINDINGS).is_err());
    }

    #[test]
    fn draw_requires_geometry() {
        let mut device = HeadlessDevice::new(1, 1);
        let vertex = device
            .compile_stage(StageKind::Vertex, DEFAULT_VERTEX_SHADER)
            .expect("vertex");
        let fragment = device
            .compile_stage(StageKind::Fragment, DEFAULT_FRAGMENT_SHADER)
            .expect("fragment");
        let program = device
            .link_program(&[vertex, fragment], &ATTRIBUTE_BINDINGS)
            .expect("link");
        assert!(matches!(device.draw(program, 6), Err(DeviceError::MissingGeometry)));
    }
}
