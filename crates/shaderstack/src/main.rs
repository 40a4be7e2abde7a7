mod cli;
mod paths;
mod run;

use std::path::Path;

use anyhow::{Context, Result};
use cli::{CacheAction, Command};
use curves::{CurveId, DurableStore};
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    let config = cli.config.as_deref();
    match cli.command {
        Some(Command::Render(args)) => run::render(config, args),
        Some(Command::Cache(cache_cmd)) => handle_cache_command(config, cache_cmd.action),
        None => run::run(config, cli.run),
    }
}

fn handle_cache_command(config_path: Option<&Path>, action: CacheAction) -> Result<()> {
    let paths = AppPaths::discover()?;
    match action {
        CacheAction::Where => {
            println!("config dir:  {}", paths.config_dir().display());
            println!("config file: {}", paths.config_file().display());
            println!("cache dir:   {}", paths.cache_dir().display());
            println!("curve cache: {}", paths.curve_cache_dir().display());
            Ok(())
        }
        CacheAction::List => {
            let config = run::load_config(config_path, &paths)?;
            let store = run::open_store(&config, &paths)?;
            let mut ids: Vec<CurveId> = store
                .keys()
                .iter()
                .filter_map(|key| CurveId::from_store_key(key))
                .collect();
            ids.sort();
            if ids.is_empty() {
                println!("No cached curves in {}", store.root().display());
                return Ok(());
            }
            println!(
                "{} cached curves ({} of {} bytes):",
                ids.len(),
                store.used_bytes(),
                store.capacity()
            );
            for id in ids {
                println!("  {id}");
            }
            Ok(())
        }
        CacheAction::Clear => {
            let config = run::load_config(config_path, &paths)?;
            let mut store = run::open_store(&config, &paths)?;
            let count = store.keys().len();
            store
                .clear()
                .with_context(|| format!("failed to clear {}", store.root().display()))?;
            println!("Removed {count} cached curves");
            Ok(())
        }
    }
}
