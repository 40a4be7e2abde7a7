//! Software reference backend.
//!
//! Evaluates each program's kernel once per pixel into float frames. It backs
//! the headless `render` command and every stage test; the GPU backend runs
//! the GLSL version of the same kernels.

pub(crate) mod kernels;
mod noise;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use image::{ImageResult, RgbaImage};
use tracing::{debug, trace};

use crate::backend::{Destination, DrawError, GraphicsBackend, LinkError, ProgramHandle};
use crate::program::{Kernel, ProgramSpec};
use crate::effects::{CURVE_TEXTURE, IMAGE_TEXTURE};
use crate::shaders::POST_INPUT;
use crate::types::SurfaceSize;
use crate::uniforms::{TargetId, TextureBinding, UniformSet};
use kernels::{AsciiParams, CompositeParams, Sampler};

/// RGBA float pixels, rows top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    size: SurfaceSize,
    pixels: Vec<[f32; 4]>,
}

impl Frame {
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            size,
            pixels: vec![[0.0; 4]; size.width as usize * size.height as usize],
        }
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    /// Pixel at column `x`, row `y` (row 0 at the top).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.size.width as usize + x as usize)
            .copied()
    }

    /// Nearest sample at normalized coordinates, `v = 0` at the top.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        if self.size.is_empty() {
            return [0.0; 4];
        }
        let x = ((u * self.size.width as f32).floor() as i64).clamp(0, self.size.width as i64 - 1);
        let y = ((v * self.size.height as f32).floor() as i64).clamp(0, self.size.height as i64 - 1);
        self.pixels[y as usize * self.size.width as usize + x as usize]
    }

    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|pixel| pixel.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect()
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.size.width, self.size.height, self.to_rgba8())
    }

    /// Writes the frame as a PNG.
    pub fn save_png(&self, path: &Path) -> ImageResult<()> {
        image::save_buffer_with_format(
            path,
            &self.to_rgba8(),
            self.size.width,
            self.size.height,
            image::ExtendedColorType::Rgba8,
            image::ImageFormat::Png,
        )
    }
}

/// Record of one draw call, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub program: String,
    pub destination: Destination,
}

struct CpuProgram {
    name: String,
    kernel: Kernel,
}

pub struct CpuBackend {
    size: SurfaceSize,
    back: Frame,
    screen: Frame,
    targets: BTreeMap<TargetId, Frame>,
    programs: Vec<CpuProgram>,
    next_target: u32,
    rejected: HashSet<String>,
    draws: Vec<DrawRecord>,
    presents: u64,
}

impl CpuBackend {
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            size,
            back: Frame::new(size),
            screen: Frame::new(size),
            targets: BTreeMap::new(),
            programs: Vec::new(),
            next_target: 1,
            rejected: HashSet::new(),
            draws: Vec::new(),
            presents: 0,
        }
    }

    /// Makes linking the named program fail, as a broken shader would.
    pub fn reject_program(&mut self, name: impl Into<String>) {
        self.rejected.insert(name.into());
    }

    /// The last presented frame.
    pub fn screen(&self) -> &Frame {
        &self.screen
    }

    pub fn target_frame(&self, target: TargetId) -> Option<&Frame> {
        self.targets.get(&target)
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    fn binding(uniforms: &UniformSet, name: &str) -> TextureBinding {
        uniforms
            .get(name)
            .and_then(|cell| cell.with(|value| value.as_texture().cloned()))
            .unwrap_or_default()
    }

    fn sampler<'a>(&'a self, binding: &'a TextureBinding) -> Sampler<'a> {
        match binding {
            TextureBinding::Empty => Sampler::Empty,
            TextureBinding::Image(image) => Sampler::Image(image.as_ref()),
            TextureBinding::Target(target) => self
                .targets
                .get(target)
                .map_or(Sampler::Empty, Sampler::Frame),
        }
    }

    fn evaluate(&self, kernel: Kernel, uniforms: &UniformSet, size: SurfaceSize) -> Frame {
        let mut frame = Frame::new(size);
        let height = size.height as f32;
        let width = size.width as usize;
        let mut shade = |eval: &dyn Fn([f32; 2]) -> [f32; 4]| {
            for (index, pixel) in frame.pixels.iter_mut().enumerate() {
                let column = (index % width) as f32;
                let row = (index / width) as f32;
                *pixel = eval([column + 0.5, height - (row + 0.5)]);
            }
        };
        match kernel {
            Kernel::Composite => {
                let curve = Self::binding(uniforms, CURVE_TEXTURE);
                let image = Self::binding(uniforms, IMAGE_TEXTURE);
                let (curve, image) = (self.sampler(&curve), self.sampler(&image));
                let params = CompositeParams::read(uniforms);
                shade(&|frag| kernels::composite(&params, &curve, &image, frag));
            }
            Kernel::Ascii => {
                let source = Self::binding(uniforms, POST_INPUT);
                let source = self.sampler(&source);
                let params = AsciiParams::read(uniforms);
                shade(&|frag| kernels::ascii(&params, &source, frag));
            }
        }
        frame
    }
}

impl GraphicsBackend for CpuBackend {
    fn surface_size(&self) -> SurfaceSize {
        self.size
    }

    fn resize_surface(&mut self, size: SurfaceSize) {
        let size = size.at_least_one();
        if size == self.size {
            return;
        }
        debug!(%size, "resizing software surface");
        self.size = size;
        self.back = Frame::new(size);
    }

    fn link_program(&mut self, spec: &ProgramSpec) -> Result<ProgramHandle, LinkError> {
        if self.rejected.contains(&spec.name) {
            return Err(LinkError {
                program: spec.name.clone(),
                message: "rejected by backend".to_string(),
            });
        }
        let handle = ProgramHandle(self.programs.len() as u32);
        self.programs.push(CpuProgram {
            name: spec.name.clone(),
            kernel: spec.source.kernel,
        });
        debug!(program = %spec.name, handle = handle.0, "linked software program");
        Ok(handle)
    }

    fn create_target(&mut self, size: SurfaceSize) -> TargetId {
        let target = TargetId(self.next_target);
        self.next_target += 1;
        self.targets.insert(target, Frame::new(size.at_least_one()));
        target
    }

    fn resize_target(&mut self, target: TargetId, size: SurfaceSize) -> Result<(), DrawError> {
        let frame = self
            .targets
            .get_mut(&target)
            .ok_or(DrawError::UnknownTarget(target))?;
        let size = size.at_least_one();
        if frame.size != size {
            *frame = Frame::new(size);
        }
        Ok(())
    }

    fn draw(
        &mut self,
        program: ProgramHandle,
        uniforms: &UniformSet,
        destination: Destination,
    ) -> Result<(), DrawError> {
        let (name, kernel) = self
            .programs
            .get(program.0 as usize)
            .map(|linked| (linked.name.clone(), linked.kernel))
            .ok_or(DrawError::UnknownProgram(program))?;
        let size = match destination {
            Destination::Screen => self.size,
            Destination::Target(target) => self
                .targets
                .get(&target)
                .map(Frame::size)
                .ok_or(DrawError::UnknownTarget(target))?,
        };
        trace!(program = %name, ?destination, %size, "software draw");
        let frame = self.evaluate(kernel, uniforms, size);
        match destination {
            Destination::Screen => self.back = frame,
            Destination::Target(target) => {
                self.targets.insert(target, frame);
            }
        }
        self.draws.push(DrawRecord {
            program: name,
            destination,
        });
        Ok(())
    }

    fn present(&mut self) -> Result<(), DrawError> {
        self.screen = self.back.clone();
        self.presents += 1;
        Ok(())
    }
}
