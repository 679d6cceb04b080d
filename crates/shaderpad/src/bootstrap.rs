use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use canvas::{ContextOptions, TextureOptions, TextureSource, UniformValue};

use crate::cli::Args;
use crate::config::FileConfig;

pub const DEFAULT_SIZE: (u32, u32) = (800, 600);
pub const DEFAULT_FPS: f32 = 60.0;
/// Frame rates outside this range cannot be turned into a frame interval.
pub const FPS_RANGE: std::ops::RangeInclusive<f32> = 0.01..=1000.0;
pub const DEFAULT_TITLE: &str = "shaderpad";

#[derive(Debug, Clone, PartialEq)]
pub struct TextureRequest {
    pub name: String,
    pub source: TextureSource,
    pub options: TextureOptions,
}

/// Command-line flags layered over the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub fragment_path: Option<PathBuf>,
    pub vertex_path: Option<PathBuf>,
    pub size: (u32, u32),
    pub fps: f32,
    pub title: String,
    pub paused: bool,
    pub watch: bool,
    pub context: ContextOptions,
    pub uniforms: Vec<(String, UniformValue)>,
    pub textures: Vec<TextureRequest>,
}

impl Settings {
    /// `config_dir` anchors relative texture paths found in the config file.
    pub fn resolve(args: &Args, file: FileConfig, config_dir: Option<&Path>) -> Result<Self> {
        let size = match args.size.as_deref() {
            Some(spec) => parse_surface_size(spec)?,
            None => (
                file.window.width.unwrap_or(DEFAULT_SIZE.0),
                file.window.height.unwrap_or(DEFAULT_SIZE.1),
            ),
        };
        if size.0 == 0 || size.1 == 0 {
            bail!("surface dimensions must be greater than zero");
        }

        let fps = match args.fps.or(file.fps) {
            Some(fps) if FPS_RANGE.contains(&fps) => fps,
            Some(fps) => bail!(
                "fps must be between {} and {}, got {fps}",
                FPS_RANGE.start(),
                FPS_RANGE.end()
            ),
            None => DEFAULT_FPS,
        };

        let mut uniforms = file.uniforms;
        for assignment in &args.uniforms {
            let (name, value) = parse_uniform_assignment(assignment)?;
            uniforms.insert(name, value);
        }

        let mut textures: BTreeMap<String, TextureRequest> = BTreeMap::new();
        for (name, entry) in &file.textures {
            textures.insert(
                name.clone(),
                TextureRequest {
                    name: name.clone(),
                    source: resolve_reference(entry.source(), config_dir),
                    options: entry.options(),
                },
            );
        }
        for assignment in &args.textures {
            let request = parse_texture_assignment(assignment)?;
            textures.insert(request.name.clone(), request);
        }

        Ok(Self {
            fragment_path: args.shader.clone(),
            vertex_path: args.vertex.clone(),
            size,
            fps,
            title: file.window.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            paused: args.paused || file.paused,
            watch: !args.no_watch && file.watch.unwrap_or(true),
            context: file.context,
            uniforms: uniforms.into_iter().collect(),
            textures: textures.into_values().collect(),
        })
    }

    /// Files whose changes trigger a reload.
    pub fn watched_files(&self) -> Vec<(ShaderStage, PathBuf)> {
        let mut files = Vec::new();
        if let Some(path) = &self.fragment_path {
            files.push((ShaderStage::Fragment, path.clone()));
        }
        if let Some(path) = &self.vertex_path {
            files.push((ShaderStage::Vertex, path.clone()));
        }
        files
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Default)]
pub struct ShaderSources {
    pub fragment: Option<String>,
    pub vertex: Option<String>,
}

pub fn read_sources(settings: &Settings) -> Result<ShaderSources> {
    let read = |path: &Path| {
        fs::read_to_string(path)
            .with_context(|| format!("failed to read shader at {}", path.display()))
    };
    Ok(ShaderSources {
        fragment: settings.fragment_path.as_deref().map(read).transpose()?,
        vertex: settings.vertex_path.as_deref().map(read).transpose()?,
    })
}

pub fn parse_surface_size(spec: &str) -> Result<(u32, u32)> {
    let trimmed = spec.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| anyhow::anyhow!("expected WxH format, e.g. 1280x720"))?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid width in size specification"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid height in size specification"))?;

    if width == 0 || height == 0 {
        bail!("surface dimensions must be greater than zero");
    }

    Ok((width, height))
}

fn split_assignment<'a>(assignment: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    let (name, value) = assignment
        .split_once('=')
        .with_context(|| format!("--{flag} expects NAME=VALUE, got '{assignment}'"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("--{flag} is missing a uniform name in '{assignment}'");
    }
    Ok((name, value.trim()))
}

/// `NAME=JSON`. Values that are not valid JSON are taken as plain text, so
/// `u_tex=photo.png` works without quoting.
pub fn parse_uniform_assignment(assignment: &str) -> Result<(String, UniformValue)> {
    let (name, raw) = split_assignment(assignment, "uniform")?;
    if raw.is_empty() {
        bail!("--uniform {name} has no value");
    }
    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => UniformValue::from(json),
        Err(_) => UniformValue::Text(raw.to_string()),
    };
    Ok((name.to_string(), value))
}

/// `NAME=PATH` or `NAME=URL`.
pub fn parse_texture_assignment(assignment: &str) -> Result<TextureRequest> {
    let (name, reference) = split_assignment(assignment, "texture")?;
    if reference.is_empty() {
        bail!("--texture {name} has no source");
    }
    Ok(TextureRequest {
        name: name.to_string(),
        source: TextureSource::from_reference(reference),
        options: TextureOptions::default(),
    })
}

fn resolve_reference(reference: &str, base: Option<&Path>) -> TextureSource {
    match (TextureSource::from_reference(reference), base) {
        (TextureSource::Path(path), Some(base)) if path.is_relative() => {
            TextureSource::Path(base.join(path))
        }
        (source, _) => source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["shaderpad"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn surface_size_accepts_common_separators() {
        assert_eq!(parse_surface_size("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_surface_size(" 640 X 384 ").unwrap(), (640, 384));
        assert_eq!(parse_surface_size("800×600").unwrap(), (800, 600));
        assert!(parse_surface_size("0x10").is_err());
        assert!(parse_surface_size("wide").is_err());
    }

    #[test]
    fn uniform_values_parse_as_json_or_text() {
        let (name, value) = parse_uniform_assignment("u_color=[1, 0.5, 0]").unwrap();
        assert_eq!(name, "u_color");
        assert_eq!(value, UniformValue::from(vec![1.0, 0.5, 0.0]));

        let (_, value) = parse_uniform_assignment("u_tex=photo.png").unwrap();
        assert_eq!(value, UniformValue::Text("photo.png".into()));

        assert!(parse_uniform_assignment("u_empty=").is_err());
        assert!(parse_uniform_assignment("=1").is_err());
        assert!(parse_uniform_assignment("u_missing").is_err());
    }

    #[test]
    fn texture_references_pick_path_or_url() {
        let request = parse_texture_assignment("u_tex=https://example.com/a.png").unwrap();
        assert_eq!(request.source, TextureSource::Url("https://example.com/a.png".into()));
        let request = parse_texture_assignment("u_tex=a.png").unwrap();
        assert_eq!(request.source, TextureSource::Path("a.png".into()));
    }

    #[test]
    fn flags_override_the_config_file() {
        let file = FileConfig::parse(
            "fps = 24\n[window]\nwidth = 300\nheight = 200\n\
             [uniforms]\nu_speed = 1\nu_keep = 2\n\
             [textures]\nu_tex = \"noise.png\"\n",
        )
        .unwrap();
        let settings = Settings::resolve(
            &args(&["--size", "640x384", "--uniform", "u_speed=3"]),
            file,
            Some(Path::new("/etc/shaderpad")),
        )
        .unwrap();

        assert_eq!(settings.size, (640, 384));
        assert_eq!(settings.fps, 24.0);
        assert_eq!(
            settings.uniforms,
            vec![
                ("u_keep".to_string(), UniformValue::Number(2.0)),
                ("u_speed".to_string(), UniformValue::Number(3.0)),
            ]
        );
        assert_eq!(
            settings.textures[0].source,
            TextureSource::Path(PathBuf::from("/etc/shaderpad/noise.png"))
        );
        assert!(settings.watch);
    }

    #[test]
    fn defaults_apply_without_config() {
        let settings =
            Settings::resolve(&args(&["--no-watch", "--paused"]), FileConfig::default(), None)
                .unwrap();
        assert_eq!(settings.size, DEFAULT_SIZE);
        assert_eq!(settings.fps, DEFAULT_FPS);
        assert_eq!(settings.title, DEFAULT_TITLE);
        assert!(settings.paused);
        assert!(!settings.watch);
        assert!(settings.watched_files().is_empty());
    }

    #[test]
    fn non_positive_fps_is_rejected() {
        assert!(Settings::resolve(&args(&["--fps", "0"]), FileConfig::default(), None).is_err());
    }

    #[test]
    fn fps_outside_the_frame_interval_range_is_rejected() {
        for fps in ["1e-30", "0.001", "5000", "inf", "NaN"] {
            let err = Settings::resolve(&args(&["--fps", fps]), FileConfig::default(), None)
                .expect_err(fps);
            assert!(err.to_string().contains("between 0.01 and 1000"), "{fps}: {err}");
        }
        for fps in ["0.01", "1000"] {
            let settings = Settings::resolve(&args(&["--fps", fps]), FileConfig::default(), None)
                .expect(fps);
            assert!(Duration::from_secs_f64(1.0 / f64::from(settings.fps)) > Duration::ZERO);
        }

        let file = FileConfig {
            fps: Some(1e-30),
            ..FileConfig::default()
        };
        assert!(Settings::resolve(&args(&[]), file, None).is_err());
    }
}
