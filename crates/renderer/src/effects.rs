//! The stock effect modules and their asynchronous attachments.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use curves::{
    decode_image, CurveCache, CurveId, CurveRequest, CurveRequester, TextureHandle, MAX_CURVE_ID,
    SWATCH_SLOTS,
};
use stackconfig::{ConfigValue, ModuleOverride, StackConfig};
use tracing::{debug, info, warn};

use crate::control::ControlDescriptor;
use crate::module::{EffectModule, ExtensionContext, ModuleError, ModuleExtension, UniformSpec};
use crate::uniforms::{TextureBinding, UniformValue};

pub const CURVE_ID: &str = "uCurveId";
pub const CURVE_TEXTURE: &str = "uCurveTexture";
/// 1-based swatch slot to apply; 0 leaves `uCurveId` alone.
pub const CURVE_SWATCH: &str = "uCurveSwatch";
pub const IMAGE_TEXTURE: &str = "uImageTexture";

pub fn noise() -> EffectModule {
    EffectModule::builder("Noise")
        .uniform("uFrequencyX", UniformSpec::range(5.0, 0.0, 10.0))
        .uniform("uFrequencyY", UniformSpec::range(5.0, 0.0, 10.0))
        .uniform("uSpeed", UniformSpec::range(0.75, 0.0, 2.0))
        .uniform(
            "uNoiseType",
            UniformSpec::new(0)
                .label("Type")
                .control(ControlDescriptor::options([("Perlin", 0), ("Simplex", 1)])),
        )
        .build()
}

/// Band-pass on the noise field followed by a linear remap.
pub fn sdf() -> EffectModule {
    EffectModule::builder("SDF")
        .uniform("uFilterMin", UniformSpec::stepped(0.3, 0.0, 1.0, 0.01).label("Filter Min"))
        .uniform("uFilterMax", UniformSpec::stepped(0.7, 0.0, 1.0, 0.01).label("Filter Max"))
        .uniform("uColorScale", UniformSpec::stepped(1.0, 0.1, 5.0, 0.1).label("Color Scale"))
        .uniform("uColorOffset", UniformSpec::stepped(0.0, -1.0, 1.0, 0.1).label("Color Offset"))
        .build()
}

pub fn circle() -> EffectModule {
    EffectModule::builder("Circle")
        .uniform("uRadius", UniformSpec::range(0.3, 0.1, 0.8))
        .uniform("uStroke", UniformSpec::range(0.05, 0.0, 0.2))
        .build()
}

pub fn color() -> EffectModule {
    EffectModule::builder("Color")
        .uniform("uHueOffset", UniformSpec::range(0.0, 0.0, 1.0).label("Hue"))
        .uniform("uSaturation", UniformSpec::range(1.0, 0.0, 1.0))
        .uniform("uValue", UniformSpec::range(0.4, 0.0, 1.0).label("Lightness"))
        .build()
}

pub fn ascii() -> EffectModule {
    EffectModule::builder("ASCII")
        .uniform("uCharSize", UniformSpec::stepped(16.0, 8.0, 32.0, 8.0))
        .uniform("uBrightness", UniformSpec::stepped(1.0, 0.0, 2.0, 0.1))
        .build()
}

/// Gradient lookup fetched by id from the curve service.
pub fn curve(requester: CurveRequester) -> EffectModule {
    EffectModule::builder("Curve")
        .uniform(CURVE_TEXTURE, UniformSpec::new(TextureBinding::Empty))
        .uniform(
            CURVE_ID,
            UniformSpec::new(1)
                .label("Curve")
                .control(ControlDescriptor::stepped(1.0, MAX_CURVE_ID as f32, 1.0)),
        )
        .uniform(
            CURVE_SWATCH,
            UniformSpec::new(0)
                .label("Swatch")
                .control(ControlDescriptor::options(
                    std::iter::once(("Off".to_string(), 0)).chain(
                        (1..=SWATCH_SLOTS as i32).map(|slot| (slot.to_string(), slot)),
                    ),
                )),
        )
        .extend(CurveAttachment::new(requester))
        .build()
}

/// Image file overlay.
pub fn texture(image: Option<PathBuf>) -> EffectModule {
    EffectModule::builder("Texture")
        .uniform(IMAGE_TEXTURE, UniformSpec::new(TextureBinding::Empty))
        .uniform(
            "uTextureOpacity",
            UniformSpec::stepped(1.0, 0.0, 1.0, 0.01).label("Opacity"),
        )
        .uniform("uTextureScale", UniformSpec::stepped(1.0, 0.1, 5.0, 0.1).label("Scale"))
        .extend(ImageAttachment::new(image))
        .build()
}

/// Requests the curve named by `uCurveId` whenever it changes and installs
/// the delivered texture into `uCurveTexture`. While a fetch is pending the
/// previous texture stays bound; a failed fetch clears it and the next
/// request for the same id tries again. Picking a swatch slot copies that
/// batch curve's id into `uCurveId`.
pub struct CurveAttachment {
    requester: CurveRequester,
    requested: Option<CurveId>,
}

impl CurveAttachment {
    pub fn new(requester: CurveRequester) -> Self {
        Self {
            requester,
            requested: None,
        }
    }

    fn request(&mut self, ctx: &mut ExtensionContext<'_>) {
        let raw = ctx.uniforms.i32(CURVE_ID).unwrap_or(1);
        let id = CurveId::new(raw.clamp(1, MAX_CURVE_ID as i32) as u32);
        if self.requested == Some(id) {
            return;
        }
        self.requested = Some(id);
        match self.requester.request(id) {
            CurveRequest::Ready(texture) => {
                debug!(%id, "curve served from cache");
                install(ctx, CURVE_TEXTURE, texture);
            }
            CurveRequest::Pending(ticket) => {
                debug!(%id, ticket, "curve fetch queued");
            }
        }
        self.requester.prefetch(id);
    }

    fn apply_swatch(&mut self, ctx: &mut ExtensionContext<'_>) {
        let slot = ctx.uniforms.i32(CURVE_SWATCH).unwrap_or(0);
        if slot < 1 {
            return;
        }
        let Some(id) = self.requester.swatch_id(slot as usize - 1) else {
            warn!(slot, "swatch slot is empty; keeping the current curve");
            return;
        };
        if let Err(err) = ctx.set(CURVE_ID, id.get() as i32) {
            warn!(module = ctx.module, error = %err, "failed to apply swatch curve");
            return;
        }
        debug!(slot, %id, "swatch curve selected");
        self.request(ctx);
    }
}

fn install(ctx: &mut ExtensionContext<'_>, name: &str, texture: TextureHandle) {
    if let Err(err) = ctx.set(name, TextureBinding::Image(texture)) {
        warn!(module = ctx.module, error = %err, "failed to install texture");
    }
}

impl ModuleExtension for CurveAttachment {
    fn name(&self) -> &'static str {
        "curve-attachment"
    }

    fn on_activate(&mut self, ctx: &mut ExtensionContext<'_>) {
        self.request(ctx);
    }

    fn on_uniform_changed(&mut self, ctx: &mut ExtensionContext<'_>, name: &str) {
        match name {
            CURVE_ID => self.request(ctx),
            CURVE_SWATCH => self.apply_swatch(ctx),
            _ => {}
        }
    }

    fn poll(&mut self, ctx: &mut ExtensionContext<'_>) -> bool {
        let Some(delivery) = self.requester.poll() else {
            return false;
        };
        match delivery.texture {
            Some(texture) => {
                debug!(id = %delivery.id, "curve delivered");
                install(ctx, CURVE_TEXTURE, texture);
            }
            None => {
                warn!(id = %delivery.id, "curve unavailable; rendering without it");
                self.requested = None;
                if let Err(err) = ctx.set(CURVE_TEXTURE, TextureBinding::Empty) {
                    warn!(module = ctx.module, error = %err, "failed to clear texture");
                }
            }
        }
        true
    }
}

/// Decodes an image file on a worker thread and installs it into
/// `uImageTexture`.
pub struct ImageAttachment {
    path: Option<PathBuf>,
    incoming: Option<Receiver<Option<TextureHandle>>>,
}

impl ImageAttachment {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            incoming: None,
        }
    }
}

fn load_image(path: &Path) -> Option<TextureHandle> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read image");
            return None;
        }
    };
    match decode_image(&bytes, path.display().to_string()) {
        Ok(image) => Some(Arc::new(image)),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to decode image");
            None
        }
    }
}

impl ModuleExtension for ImageAttachment {
    fn name(&self) -> &'static str {
        "image-attachment"
    }

    fn on_activate(&mut self, _ctx: &mut ExtensionContext<'_>) {
        let Some(path) = self.path.clone() else {
            return;
        };
        let (tx, rx) = bounded(1);
        let spawned = thread::Builder::new()
            .name("image-decode".into())
            .spawn(move || {
                let _ = tx.send(load_image(&path));
            });
        match spawned {
            Ok(_) => self.incoming = Some(rx),
            Err(err) => warn!(error = %err, "failed to spawn image decode worker"),
        }
    }

    fn poll(&mut self, ctx: &mut ExtensionContext<'_>) -> bool {
        let Some(rx) = &self.incoming else {
            return false;
        };
        match rx.try_recv() {
            Ok(Some(texture)) => {
                info!(image = %texture.label, width = texture.width, height = texture.height, "image loaded");
                self.incoming = None;
                install(ctx, IMAGE_TEXTURE, texture);
                true
            }
            Ok(None) | Err(TryRecvError::Disconnected) => {
                self.incoming = None;
                false
            }
            Err(TryRecvError::Empty) => false,
        }
    }
}

/// Converts a configured override into a value for `name`.
fn config_value(module: &EffectModule, name: &str, value: &ConfigValue) -> Result<UniformValue, ModuleError> {
    let invalid = || ModuleError::InvalidValue {
        module: module.name().to_string(),
        name: name.to_string(),
        value: value.to_string(),
    };
    let converted = match value {
        ConfigValue::Bool(flag) => UniformValue::Bool(*flag),
        ConfigValue::Int(int) => UniformValue::Int(i32::try_from(*int).map_err(|_| invalid())?),
        ConfigValue::Float(float) => UniformValue::Float(*float as f32),
        ConfigValue::List(items) => match items.as_slice() {
            [x, y] => UniformValue::Vec2([*x as f32, *y as f32]),
            [x, y, z] => UniformValue::Vec3([*x as f32, *y as f32, *z as f32]),
            [x, y, z, w] => UniformValue::Vec4([*x as f32, *y as f32, *z as f32, *w as f32]),
            _ => return Err(invalid()),
        },
    };
    let kind = module
        .uniforms()
        .get(name)
        .map(|cell| cell.kind())
        .ok_or_else(|| ModuleError::UnknownUniform {
            module: module.name().to_string(),
            name: name.to_string(),
        })?;
    converted.coerce(kind).ok_or_else(invalid)
}

/// Applies one `[modules.<name>]` section.
pub fn apply_override(module: &mut EffectModule, section: &ModuleOverride) -> Result<(), ModuleError> {
    for (name, value) in &section.values {
        let value = config_value(module, name, value)?;
        module.set_uniform(name, value)?;
    }
    if let Some(enabled) = section.enabled {
        module.set_enabled(enabled);
    }
    Ok(())
}

/// Every stock module in stacking order, with configuration applied.
pub fn standard_modules(config: &StackConfig, cache: &CurveCache) -> Result<Vec<EffectModule>, ModuleError> {
    let image = config.module("texture").and_then(|section| section.image.clone());
    let mut modules = vec![
        noise(),
        sdf(),
        circle(),
        color(),
        curve(cache.requester()),
        texture(image),
        ascii(),
    ];
    for module in &mut modules {
        let key = module.name().to_ascii_lowercase();
        if let Some(section) = config.module(&key) {
            apply_override(module, section)?;
        }
    }
    Ok(modules)
}
