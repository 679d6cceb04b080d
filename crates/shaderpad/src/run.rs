use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::{read_sources, Settings};
use crate::cli::Args;
use crate::config::FileConfig;
use crate::headless::run_headless;
use crate::paths::AppPaths;
use crate::window::run_window;

pub fn run(args: Args) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    let (config_path, required) = match args.config.as_ref() {
        Some(path) => (path.clone(), true),
        None => (paths.config_file(), false),
    };
    tracing::debug!(
        config_dir = %paths.config_dir().display(),
        config = %config_path.display(),
        "resolved shaderpad paths"
    );
    let file = FileConfig::load(&config_path, required)?;
    let config_dir = config_path.parent().map(|dir| dir.to_path_buf());
    let settings = Settings::resolve(&args, file, config_dir.as_deref())
        .context("invalid shaderpad settings")?;
    let sources = read_sources(&settings)?;

    if args.headless {
        tracing::info!(frames = args.frames, size = ?settings.size, "running headless");
        let summary = run_headless(&settings, &sources, args.frames);
        let json = serde_json::to_string_pretty(&summary)
            .context("failed to serialise headless summary")?;
        println!("{json}");
        if !summary.valid {
            bail!("shader program is not valid");
        }
        Ok(())
    } else {
        tracing::info!(shader = ?settings.fragment_path, "opening shaderpad window");
        run_window(&settings, &sources)
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
