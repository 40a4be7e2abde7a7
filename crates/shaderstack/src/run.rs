use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use curves::{
    CacheSettings, CurveCache, CurveClient, CurveService, DiskStore, OfflineService, SWATCH_SLOTS,
};
use renderer::effects::{CURVE_TEXTURE, IMAGE_TEXTURE};
use renderer::{
    run_window, standard_modules, Compositor, CpuBackend, EffectModule, ScreenPass, SurfaceSize,
    TextureBinding, UniformValue, WindowConfig,
};
use scheduler::FrameScheduler;
use stackconfig::{ConfigValue, StackConfig};
use tracing_subscriber::EnvFilter;

use crate::cli::{RenderArgs, RunArgs, StackArgs};
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Reads the configuration. An explicit path must exist; a missing default
/// file means built-in defaults.
pub fn load_config(explicit: Option<&Path>, paths: &AppPaths) -> Result<StackConfig> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (paths.config_file(), false),
    };
    if !required && !path.exists() {
        tracing::debug!(path = %path.display(), "no configuration file; using defaults");
        return Ok(StackConfig::default());
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read configuration at {}", path.display()))?;
    let config = StackConfig::from_toml_str(&contents)
        .with_context(|| format!("failed to load configuration at {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// Folds command line overrides into `config` and revalidates it.
pub fn apply_stack_args(config: &mut StackConfig, args: &StackArgs) -> Result<()> {
    if let Some(size) = args.size {
        config.surface.width = size.width;
        config.surface.height = size.height;
    }
    for name in &args.enable {
        config.modules.entry(name.clone()).or_default().enabled = Some(true);
    }
    if let Some(id) = args.curve_id {
        let section = config.modules.entry("curve".to_string()).or_default();
        section.enabled = Some(true);
        section
            .values
            .insert("uCurveId".to_string(), ConfigValue::Int(i64::from(id)));
    }
    if let Some(image) = &args.texture {
        let section = config.modules.entry("texture".to_string()).or_default();
        section.enabled = Some(true);
        section.image = Some(image.clone());
    }
    if args.offline {
        config.curves.offline = true;
    }
    config.validate().context("invalid command line overrides")?;
    Ok(())
}

pub fn open_store(config: &StackConfig, paths: &AppPaths) -> Result<DiskStore> {
    let root = paths.curve_cache_dir();
    DiskStore::open(&root, config.curves.cache_capacity)
        .with_context(|| format!("failed to open curve cache at {}", root.display()))
}

fn open_cache(config: &StackConfig, paths: &AppPaths) -> Result<CurveCache> {
    let service: Arc<dyn CurveService> = if config.curves.offline {
        tracing::info!("curve service disabled (offline); using cached curves only");
        Arc::new(OfflineService)
    } else {
        Arc::new(CurveClient::new(&config.curves).context("failed to construct curve client")?)
    };
    let store = open_store(config, paths)?;
    Ok(CurveCache::new(
        service,
        Box::new(store),
        CacheSettings::from_config(&config.curves),
    ))
}

fn surface_size(config: &StackConfig) -> SurfaceSize {
    SurfaceSize::new(config.surface.width, config.surface.height)
}

pub fn run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let mut config = load_config(config_path, &paths)?;
    apply_stack_args(&mut config, &args.stack)?;
    if let Some(fps) = args.fps {
        config.frame.fps = fps;
        config.validate().context("invalid --fps")?;
    }

    let cache = open_cache(&config, &paths)?;
    if config.curves.batch_endpoint.is_some() && !config.curves.offline {
        cache.fetch_random_batch(SWATCH_SLOTS);
    }
    let modules = standard_modules(&config, &cache).context("failed to apply module configuration")?;
    let scheduler = FrameScheduler::from_config(&config).context("invalid frame rate")?;
    let window = WindowConfig {
        surface_size: surface_size(&config),
        ..WindowConfig::default()
    };
    tracing::info!(
        size = %window.surface_size,
        fps = config.frame.fps,
        enabled = ?enabled_names(&modules),
        "starting shaderstack"
    );
    run_window(window, modules, scheduler)
}

pub fn render(config_path: Option<&Path>, args: RenderArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let mut config = load_config(config_path, &paths)?;
    apply_stack_args(&mut config, &args.stack)?;
    if !args.time.is_finite() || args.time < 0.0 {
        bail!("--time must be a non-negative number of seconds, got {}", args.time);
    }

    let cache = open_cache(&config, &paths)?;
    let modules = standard_modules(&config, &cache).context("failed to apply module configuration")?;
    let size = surface_size(&config);
    let scheduler = FrameScheduler::new(None).context("failed to create frame scheduler")?;
    let mut compositor = Compositor::new(CpuBackend::new(size), modules, scheduler)
        .context("failed to build shader programs")?;

    settle(&mut compositor, args.settle);
    let screen = compositor
        .render_at(args.time)
        .context("failed to render frame")?;
    if screen == ScreenPass::Nothing {
        tracing::warn!("no program could draw; writing a black frame");
    }

    if let Some(parent) = args.output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    compositor
        .backend()
        .screen()
        .save_png(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    tracing::info!(
        output = %args.output.display(),
        %size,
        time = args.time,
        ?screen,
        enabled = ?enabled_names(compositor.modules()),
        "rendered still frame"
    );
    Ok(())
}

fn enabled_names(modules: &[EffectModule]) -> Vec<&str> {
    modules
        .iter()
        .filter(|module| module.is_enabled())
        .map(EffectModule::name)
        .collect()
}

/// Enabled modules whose texture has not arrived yet.
fn awaiting_textures(modules: &[EffectModule]) -> bool {
    modules
        .iter()
        .filter(|module| module.is_enabled())
        .any(|module| {
            [CURVE_TEXTURE, IMAGE_TEXTURE].iter().any(|name| {
                matches!(
                    module.uniforms().value(name),
                    Some(UniformValue::Texture(TextureBinding::Empty))
                )
            })
        })
}

/// Polls attachments until every enabled texture is installed or `wait`
/// runs out.
fn settle(compositor: &mut Compositor<CpuBackend>, wait: Duration) {
    let deadline = Instant::now() + wait;
    loop {
        compositor.poll_modules();
        if !awaiting_textures(compositor.modules()) {
            return;
        }
        if Instant::now() >= deadline {
            tracing::warn!(?wait, "textures still pending; rendering without them");
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
