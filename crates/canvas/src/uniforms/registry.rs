use std::collections::{BTreeMap, HashMap};

use crate::device::{GraphicsDevice, ProgramHandle, UniformLocation};
use crate::textures::{TextureManager, TextureOptions, TextureSource};

use super::infer::{UniformData, UniformDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocationState {
    Unresolved,
    Resolved(Option<UniformLocation>),
}

#[derive(Debug, Clone, PartialEq)]
struct UniformBinding {
    data: UniformData,
    location: LocationState,
    dirty: bool,
}

/// Last known value of every uniform and where it lives in the current
/// program. Uploads happen only for bindings that changed since the last
/// flush or since the program was swapped.
#[derive(Debug, Default)]
pub struct UniformRegistry {
    bindings: BTreeMap<String, UniformBinding>,
    texture_sources: HashMap<String, String>,
}

impl UniformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `descriptors`, delegating texture references to `textures`.
    /// Returns `true` if any value differs from what was stored.
    pub fn apply(&mut self, descriptors: Vec<UniformDescriptor>, textures: &mut TextureManager) -> bool {
        let mut changed = false;
        for UniformDescriptor { name, data } in descriptors {
            match data {
                UniformData::Sampler(source) => {
                    changed |= self.request_texture(textures, name, source);
                }
                UniformData::SamplerArray(sources) => {
                    for (index, source) in sources.into_iter().enumerate() {
                        changed |= self.request_texture(textures, format!("{name}[{index}]"), source);
                    }
                }
                data => changed |= self.apply_one(&name, data),
            }
        }
        changed
    }

    /// Stores a non-texture value, marking it for upload when new or
    /// different.
    pub fn apply_one(&mut self, name: &str, data: UniformData) -> bool {
        match self.bindings.get_mut(name) {
            Some(binding) if binding.data == data => false,
            Some(binding) => {
                binding.data = data;
                binding.dirty = true;
                true
            }
            None => {
                self.bindings.insert(
                    name.to_owned(),
                    UniformBinding {
                        data,
                        location: LocationState::Unresolved,
                        dirty: true,
                    },
                );
                true
            }
        }
    }

    fn request_texture(&mut self, textures: &mut TextureManager, name: String, source: String) -> bool {
        // A failed load is retried even when the source is unchanged.
        if self.texture_sources.get(&name) == Some(&source)
            && textures.contains(&name)
            && !textures.has_failed(&name)
        {
            return false;
        }
        textures.load(&name, TextureSource::from_reference(&source), TextureOptions::default());
        self.texture_sources.insert(name, source);
        true
    }

    /// Uploads every dirty binding that has a location in `program` and
    /// returns how many uploads were issued.
    pub fn flush<D: GraphicsDevice>(&mut self, device: &mut D, program: ProgramHandle) -> usize {
        let mut uploads = 0;
        for (name, binding) in self.bindings.iter_mut().filter(|(_, binding)| binding.dirty) {
            let location = match binding.location {
                LocationState::Resolved(location) => location,
                LocationState::Unresolved => {
                    let location = device.uniform_location(program, name);
                    if location.is_none() {
                        tracing::trace!(uniform = %name, "uniform not active in program");
                    }
                    binding.location = LocationState::Resolved(location);
                    location
                }
            };
            if let Some(location) = location {
                device.upload_uniform(program, location, &binding.data);
                uploads += 1;
            }
            binding.dirty = false;
        }
        uploads
    }

    /// Forgets resolved locations and schedules every binding for upload.
    pub fn invalidate(&mut self) {
        for binding in self.bindings.values_mut() {
            binding.location = LocationState::Unresolved;
            binding.dirty = true;
        }
    }

    pub fn get(&self, name: &str) -> Option<&UniformData> {
        self.bindings.get(name).map(|binding| &binding.data)
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.bindings.get(name).is_some_and(|binding| binding.dirty)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
        self.texture_sources.clear();
    }
}
