//! Named textures loaded off the render thread.
//!
//! Decoding and fetching run through a [`Dispatcher`]; results come back over
//! a channel and only touch the device inside [`TextureManager::drain`], which
//! the runtime calls at the top of every tick.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender};
use image::imageops::flip_vertical_in_place;
use image::RgbaImage;
use serde::Deserialize;
use thiserror::Error;

use crate::device::{GraphicsDevice, TextureHandle};
use crate::events::{CanvasEvent, EventBus};
use crate::uniforms::{UniformData, UniformRegistry};

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("failed to read texture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode texture {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to fetch texture {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("fetching texture {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("pixel buffer for {width}x{height} texture has {actual} bytes, expected {expected}")]
    PixelSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Tightly packed RGBA8 pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct TextureImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl TextureImage {
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, TextureError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(TextureError::PixelSize {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// A single opaque pixel.
    pub fn solid(color: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: color.to_vec(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

impl From<RgbaImage> for TextureImage {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            rgba: image.into_raw(),
        }
    }
}

impl fmt::Debug for TextureImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextureSource {
    Path(PathBuf),
    Url(String),
    Pixels(TextureImage),
}

impl TextureSource {
    /// `http://` and `https://` references are fetched, anything else is read
    /// from disk.
    pub fn from_reference(reference: &str) -> Self {
        let lower = reference.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            TextureSource::Url(reference.to_owned())
        } else {
            TextureSource::Path(PathBuf::from(reference))
        }
    }

    fn describe(&self) -> String {
        match self {
            TextureSource::Path(path) => path.display().to_string(),
            TextureSource::Url(url) => url.clone(),
            TextureSource::Pixels(image) => format!("<{}x{} pixels>", image.width, image.height),
        }
    }
}

impl From<&Path> for TextureSource {
    fn from(path: &Path) -> Self {
        TextureSource::Path(path.to_path_buf())
    }
}

impl From<TextureImage> for TextureSource {
    fn from(image: TextureImage) -> Self {
        TextureSource::Pixels(image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFiltering {
    #[default]
    Linear,
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TextureOptions {
    /// Store rows bottom-up so `v = 0` samples the bottom of the image.
    pub flip_y: bool,
    pub filtering: TextureFiltering,
    /// Repeat instead of clamping outside `[0, 1]`.
    pub repeat: bool,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            flip_y: true,
            filtering: TextureFiltering::Linear,
            repeat: false,
        }
    }
}

pub type TextureJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs texture jobs somewhere other than the render loop.
pub trait Dispatcher {
    fn dispatch(&self, job: TextureJob);
}

/// Runs every job on a fresh worker thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDispatcher;

impl Dispatcher for ThreadDispatcher {
    fn dispatch(&self, job: TextureJob) {
        // Builder::spawn consumes the closure, so a failed spawn cannot fall
        // back to running it here; the entry simply never completes.
        if let Err(err) = std::thread::Builder::new()
            .name("canvas-texture".into())
            .spawn(job)
        {
            tracing::error!(error = %err, "failed to spawn texture worker");
        }
    }
}

/// Runs jobs immediately on the calling thread. Completions still wait for
/// the next [`TextureManager::drain`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: TextureJob) {
        job();
    }
}

struct Completion {
    name: String,
    generation: u64,
    result: Result<TextureImage, TextureError>,
}

#[derive(Debug)]
struct TextureEntry {
    handle: Option<TextureHandle>,
    generation: u64,
    options: TextureOptions,
    size: Option<(u32, u32)>,
    /// The latest load failed and nothing newer is in flight.
    failed: bool,
}

pub struct TextureManager {
    entries: BTreeMap<String, TextureEntry>,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    dispatcher: Box<dyn Dispatcher>,
}

impl TextureManager {
    pub fn new(dispatcher: Box<dyn Dispatcher>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            entries: BTreeMap::new(),
            sender,
            receiver,
            dispatcher,
        }
    }

    /// Registers `name` if needed and schedules new contents for it. A newer
    /// load for the same name supersedes any still in flight.
    pub fn load(&mut self, name: &str, source: TextureSource, options: TextureOptions) {
        let entry = self
            .entries
            .entry(name.to_owned())
            .or_insert_with(|| TextureEntry {
                handle: None,
                generation: 0,
                options: options.clone(),
                size: None,
                failed: false,
            });
        entry.generation += 1;
        entry.failed = false;
        entry.options = options.clone();

        tracing::debug!(
            texture = name,
            source = %source.describe(),
            generation = entry.generation,
            "scheduling texture load"
        );

        let sender = self.sender.clone();
        let name = name.to_owned();
        let generation = entry.generation;
        self.dispatcher.dispatch(Box::new(move || {
            let result = decode(source, &options);
            // The manager may be gone by the time a slow fetch finishes.
            let _ = sender.send(Completion {
                name,
                generation,
                result,
            });
        }));
    }

    /// Applies finished loads to the device. Returns `true` when any texture
    /// received new contents.
    pub fn drain<D: GraphicsDevice>(&mut self, device: &mut D, events: &mut EventBus) -> bool {
        let mut changed = false;
        while let Ok(completion) = self.receiver.try_recv() {
            let Some(entry) = self.entries.get_mut(&completion.name) else {
                continue;
            };
            if entry.generation != completion.generation {
                tracing::debug!(
                    texture = %completion.name,
                    stale = completion.generation,
                    current = entry.generation,
                    "dropping superseded texture load"
                );
                continue;
            }

            let outcome = completion
                .result
                .map_err(|err| err.to_string())
                .and_then(|image| {
                    upload(device, &completion.name, entry, &image)
                        .map(|()| (image.width, image.height))
                });

            match outcome {
                Ok((width, height)) => {
                    entry.failed = false;
                    tracing::info!(texture = %completion.name, width, height, "texture loaded");
                    events.emit(&CanvasEvent::TextureLoaded {
                        name: completion.name,
                        width,
                        height,
                    });
                    changed = true;
                }
                Err(error) => {
                    entry.failed = true;
                    tracing::warn!(texture = %completion.name, %error, "texture load failed");
                    events.emit(&CanvasEvent::TextureFailed {
                        name: completion.name,
                        error,
                    });
                }
            }
        }
        changed
    }

    /// Binds every texture with contents to consecutive units in name order
    /// and feeds the unit and `<name>Resolution` through `registry`.
    pub fn bind<D: GraphicsDevice>(&self, device: &mut D, registry: &mut UniformRegistry) {
        let mut unit = 0;
        for (name, entry) in &self.entries {
            let (Some(handle), Some((width, height))) = (entry.handle, entry.size) else {
                continue;
            };
            device.bind_texture(unit, handle);
            registry.apply_one(name, UniformData::Int(unit as i32));
            registry.apply_one(
                &format!("{name}Resolution"),
                UniformData::Vec2([width as f32, height as f32]),
            );
            unit += 1;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether the most recent load of `name` failed. Cleared by the next
    /// load.
    pub fn has_failed(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|entry| entry.failed)
    }

    pub fn handle(&self, name: &str) -> Option<TextureHandle> {
        self.entries.get(name).and_then(|entry| entry.handle)
    }

    pub fn size(&self, name: &str) -> Option<(u32, u32)> {
        self.entries.get(name).and_then(|entry| entry.size)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn release_all<D: GraphicsDevice>(&mut self, device: &mut D) {
        for (name, entry) in std::mem::take(&mut self.entries) {
            if let Some(handle) = entry.handle {
                tracing::trace!(texture = %name, "releasing texture");
                device.release_texture(handle);
            }
        }
    }
}

impl fmt::Debug for TextureManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureManager")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

fn upload<D: GraphicsDevice>(
    device: &mut D,
    name: &str,
    entry: &mut TextureEntry,
    image: &TextureImage,
) -> Result<(), String> {
    let handle = match entry.handle {
        Some(handle) => handle,
        None => {
            let handle = device.create_texture(name).map_err(|err| err.to_string())?;
            entry.handle = Some(handle);
            handle
        }
    };
    device
        .write_texture(handle, image, &entry.options)
        .map_err(|err| err.to_string())?;
    entry.size = Some((image.width, image.height));
    Ok(())
}

fn decode(source: TextureSource, options: &TextureOptions) -> Result<TextureImage, TextureError> {
    let mut image = match source {
        TextureSource::Pixels(image) => {
            let (width, height) = (image.width, image.height);
            let actual = image.rgba.len();
            RgbaImage::from_raw(width, height, image.rgba).ok_or(TextureError::PixelSize {
                width,
                height,
                expected: width as usize * height as usize * 4,
                actual,
            })?
        }
        TextureSource::Path(path) => {
            let bytes = std::fs::read(&path).map_err(|source| TextureError::Io {
                path: path.clone(),
                source,
            })?;
            decode_bytes(&bytes, path.display().to_string())?
        }
        TextureSource::Url(url) => {
            let response =
                reqwest::blocking::get(&url).map_err(|source| TextureError::Fetch {
                    url: url.clone(),
                    source,
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(TextureError::Status {
                    url,
                    status: status.as_u16(),
                });
            }
            let bytes = response.bytes().map_err(|source| TextureError::Fetch {
                url: url.clone(),
                source,
            })?;
            decode_bytes(&bytes, url)?
        }
    };
    if options.flip_y {
        flip_vertical_in_place(&mut image);
    }
    Ok(image.into())
}

fn decode_bytes(bytes: &[u8], origin: String) -> Result<RgbaImage, TextureError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|source| TextureError::Decode { origin, source })?;
    Ok(decoded.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::headless::HeadlessDevice;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn pixels(rows: &[[u8; 4]]) -> TextureImage {
        TextureImage::from_rgba(1, rows.len() as u32, rows.concat()).expect("valid pixels")
    }

    #[test]
    fn reference_scheme_selects_source() {
        assert_eq!(
            TextureSource::from_reference("https://example.com/a.png"),
            TextureSource::Url("https://example.com/a.png".into())
        );
        assert_eq!(
            TextureSource::from_reference("textures/a.png"),
            TextureSource::Path(PathBuf::from("textures/a.png"))
        );
    }

    #[test]
    fn from_rgba_rejects_wrong_length() {
        let err = TextureImage::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, TextureError::PixelSize { expected: 16, actual: 15, .. }));
    }

    #[test]
    fn drain_creates_once_and_rewrites_in_place() {
        let mut device = HeadlessDevice::new(4, 4);
        let mut events = EventBus::new();
        let mut manager = TextureManager::new(Box::new(InlineDispatcher));

        manager.load("u_tex", pixels(&[[255, 0, 0, 255]]).into(), TextureOptions::default());
        assert!(manager.drain(&mut device, &mut events));
        let first = manager.handle("u_tex").expect("created");

        manager.load(
            "u_tex",
            pixels(&[[0, 255, 0, 255], [0, 0, 255, 255]]).into(),
            TextureOptions::default(),
        );
        assert!(manager.drain(&mut device, &mut events));
        assert_eq!(manager.handle("u_tex"), Some(first));
        assert_eq!(manager.size("u_tex"), Some((1, 2)));
        assert_eq!(device.textures_created(), 1);
        assert_eq!(device.texture_writes(first), 2);
    }

    #[test]
    fn flip_reverses_rows() {
        let mut device = HeadlessDevice::new(4, 4);
        let mut manager = TextureManager::new(Box::new(InlineDispatcher));
        manager.load(
            "u_tex",
            pixels(&[[1, 1, 1, 1], [2, 2, 2, 2]]).into(),
            TextureOptions::default(),
        );
        manager.drain(&mut device, &mut EventBus::new());
        let handle = manager.handle("u_tex").expect("created");
        let written = device.texture_contents(handle).expect("written");
        assert_eq!(written.rgba(), &[2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn stale_completions_are_ignored() {
        let queued: Rc<RefCell<Vec<TextureJob>>> = Rc::default();
        struct Deferred(Rc<RefCell<Vec<TextureJob>>>);
        impl Dispatcher for Deferred {
            fn dispatch(&self, job: TextureJob) {
                self.0.borrow_mut().push(job);
            }
        }

        let mut device = HeadlessDevice::new(4, 4);
        let mut events = EventBus::new();
        let mut manager = TextureManager::new(Box::new(Deferred(Rc::clone(&queued))));
        manager.load("u_tex", pixels(&[[1, 0, 0, 255]]).into(), TextureOptions::default());
        manager.load(
            "u_tex",
            pixels(&[[2, 0, 0, 255], [2, 0, 0, 255]]).into(),
            TextureOptions::default(),
        );

        // Run the newer job first, then the superseded one.
        let mut jobs = std::mem::take(&mut *queued.borrow_mut());
        while let Some(job) = jobs.pop() {
            job();
        }
        manager.drain(&mut device, &mut events);
        assert_eq!(manager.size("u_tex"), Some((1, 2)));
        let handle = manager.handle("u_tex").expect("created");
        assert_eq!(device.texture_writes(handle), 1);
    }

    #[test]
    fn missing_file_reports_failure_and_keeps_state() {
        let failures = Rc::new(RefCell::new(Vec::new()));
        let mut events = EventBus::new();
        let sink = Rc::clone(&failures);
        events.subscribe(EventKind::TextureFailed, move |event| {
            if let CanvasEvent::TextureFailed { name, .. } = event {
                sink.borrow_mut().push(name.clone());
            }
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let mut device = HeadlessDevice::new(4, 4);
        let mut manager = TextureManager::new(Box::new(InlineDispatcher));
        manager.load(
            "u_tex",
            TextureSource::Path(dir.path().join("missing.png")),
            TextureOptions::default(),
        );
        assert!(!manager.drain(&mut device, &mut events));
        assert_eq!(*failures.borrow(), vec!["u_tex".to_string()]);
        assert!(manager.contains("u_tex"));
        assert_eq!(manager.handle("u_tex"), None);
    }

    #[test]
    fn decodes_png_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("checker.png");
        let image = RgbaImage::from_fn(2, 3, |x, y| image::Rgba([x as u8, y as u8, 0, 255]));
        image.save(&path).expect("write png");

        let mut device = HeadlessDevice::new(4, 4);
        let mut manager = TextureManager::new(Box::new(InlineDispatcher));
        manager.load("u_img", TextureSource::Path(path), TextureOptions::default());
        assert!(manager.drain(&mut device, &mut EventBus::new()));
        assert_eq!(manager.size("u_img"), Some((2, 3)));
    }

    #[test]
    fn bind_assigns_units_in_name_order() {
        let mut device = HeadlessDevice::new(4, 4);
        let mut registry = UniformRegistry::new();
        let mut manager = TextureManager::new(Box::new(InlineDispatcher));
        manager.load("u_b", pixels(&[[0, 0, 0, 255]]).into(), TextureOptions::default());
        manager.load("u_a", pixels(&[[0, 0, 0, 255]]).into(), TextureOptions::default());
        manager.drain(&mut device, &mut EventBus::new());

        manager.bind(&mut device, &mut registry);
        assert_eq!(registry.get("u_a"), Some(&UniformData::Int(0)));
        assert_eq!(registry.get("u_b"), Some(&UniformData::Int(1)));
        assert_eq!(
            registry.get("u_aResolution"),
            Some(&UniformData::Vec2([1.0, 1.0]))
        );
        assert_eq!(device.bound_textures().len(), 2);
    }
}
