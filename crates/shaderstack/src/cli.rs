use std::path::PathBuf;
use std::time::Duration;

use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand};
use renderer::SurfaceSize;
use stackconfig::KNOWN_MODULES;

#[derive(Parser, Debug)]
#[command(
    name = "shaderstack",
    author,
    version,
    about = "Layered shader effect compositor",
    arg_required_else_help = false
)]
pub struct Cli {
    /// Configuration file (defaults to `config.toml` in the config directory).
    #[arg(long, global = true, value_name = "FILE", env = "SHADERSTACK_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Overrides shared by the window and still renders.
#[derive(Parser, Debug, Default, Clone)]
pub struct StackArgs {
    /// Surface size in physical pixels (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = clap::value_parser!(SurfaceSize))]
    pub size: Option<SurfaceSize>,

    /// Enable a module at startup; may be repeated.
    #[arg(
        long = "enable",
        value_name = "MODULE",
        value_parser = PossibleValuesParser::new(KNOWN_MODULES.iter().copied())
    )]
    pub enable: Vec<String>,

    /// Gradient curve to load; enables the curve module.
    #[arg(long, value_name = "ID", value_parser = clap::value_parser!(u32).range(1..=9999))]
    pub curve_id: Option<u32>,

    /// Image overlay for the texture module; enables it.
    #[arg(long, value_name = "PATH")]
    pub texture: Option<PathBuf>,

    /// Never contact the curve service; only cached curves are used.
    #[arg(long)]
    pub offline: bool,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Frame rate cap (0 = uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render one frame on the CPU and write it as PNG.
    Render(RenderArgs),
    /// Inspect or clear the gradient curve cache.
    Cache(CacheCommand),
}

#[derive(Parser, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Animation time to evaluate, in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    pub time: f32,

    /// Destination PNG path.
    #[arg(long, short, value_name = "PATH")]
    pub output: PathBuf,

    /// How long to wait for curves and images before rendering (e.g. `2s`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, default_value = "2s")]
    pub settle: Duration,
}

#[derive(Parser, Debug)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print resolved config and cache directories.
    Where,
    /// List cached curve ids.
    List,
    /// Remove every cached curve.
    Clear,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value.trim()).map_err(|err| format!("invalid duration '{value}': {err}"))
}
