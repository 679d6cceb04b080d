use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "shaderpad",
    author,
    version,
    about = "Live GLSL fragment shader viewer",
    arg_required_else_help = false
)]
pub struct Args {
    /// Fragment shader to display; the built-in default is used when omitted.
    #[arg(value_name = "SHADER")]
    pub shader: Option<PathBuf>,

    /// Vertex shader replacing the built-in full-screen quad stage.
    #[arg(long, value_name = "PATH")]
    pub vertex: Option<PathBuf>,

    /// Window (or headless surface) size, e.g. `1280x720`.
    #[arg(long, value_name = "WIDTHxHEIGHT")]
    pub size: Option<String>,

    /// Frame rate cap for passive redraws.
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Uniform value as JSON, e.g. `u_color=[1,0.5,0]`. Repeatable.
    #[arg(long = "uniform", value_name = "NAME=JSON")]
    pub uniforms: Vec<String>,

    /// Texture bound to a sampler uniform, from a file path or http(s) URL.
    /// Repeatable.
    #[arg(long = "texture", value_name = "NAME=PATH|URL")]
    pub textures: Vec<String>,

    /// Start with playback paused.
    #[arg(long)]
    pub paused: bool,

    /// Render without a window and print a JSON summary to stdout.
    #[arg(long)]
    pub headless: bool,

    /// Number of frames to tick in headless mode.
    #[arg(long, value_name = "N", default_value_t = 1, requires = "headless")]
    pub frames: u64,

    /// Configuration file; defaults to `config.toml` in the config directory.
    #[arg(long, value_name = "PATH", env = "SHADERPAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not reload shaders when their files change.
    #[arg(long)]
    pub no_watch: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeatable_flags_collect_in_order() {
        let args = Args::try_parse_from([
            "shaderpad",
            "demo.frag",
            "--uniform",
            "u_a=1",
            "--uniform",
            "u_b=[1,2]",
            "--texture",
            "u_tex=cat.png",
        ])
        .unwrap();
        assert_eq!(args.shader, Some(PathBuf::from("demo.frag")));
        assert_eq!(args.uniforms, vec!["u_a=1", "u_b=[1,2]"]);
        assert_eq!(args.textures, vec!["u_tex=cat.png"]);
        assert!(!args.headless);
    }

    #[test]
    fn frames_require_headless() {
        assert!(Args::try_parse_from(["shaderpad", "--frames", "3"]).is_err());
        let args = Args::try_parse_from(["shaderpad", "--headless", "--frames", "3"]).unwrap();
        assert_eq!(args.frames, 3);
    }
}
