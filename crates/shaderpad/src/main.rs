mod bootstrap;
mod cli;
mod config;
mod headless;
mod paths;
mod run;
mod watch;
mod window;

use anyhow::Result;

fn main() -> Result<()> {
    let args = cli::parse();
    run::run(args)
}
