use std::fmt;
use std::str::FromStr;

/// Drawing buffer size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height; 1.0 for a degenerate size.
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_vec2(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }

    /// Clamps both dimensions to at least one pixel.
    pub fn at_least_one(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for SurfaceSize {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `1280x720`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
        let width: u32 = width
            .parse()
            .map_err(|err| format!("invalid width '{width}': {err}"))?;
        let height: u32 = height
            .parse()
            .map_err(|err| format!("invalid height '{height}': {err}"))?;
        if width == 0 || height == 0 {
            return Err(format!("size must be non-zero, got '{s}'"));
        }
        Ok(Self { width, height })
    }
}

/// Adapter power preference forwarded to `wgpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

/// Presentation settings for the preview window.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Initial inner size in physical pixels.
    pub surface_size: SurfaceSize,
    /// Window title prefix; the control panel appends the selected binding.
    pub title: String,
    /// Wait for vertical blank before presenting.
    pub vsync: bool,
    pub power: GpuPowerPreference,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            surface_size: SurfaceSize::new(1280, 720),
            title: "shaderstack".to_string(),
            vsync: true,
            power: GpuPowerPreference::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_size() {
        assert_eq!("800x600".parse(), Ok(SurfaceSize::new(800, 600)));
        assert_eq!("1920X1080".parse(), Ok(SurfaceSize::new(1920, 1080)));
        assert!("800".parse::<SurfaceSize>().is_err());
        assert!("0x10".parse::<SurfaceSize>().is_err());
    }

    #[test]
    fn aspect_handles_zero_height() {
        assert_eq!(SurfaceSize::new(10, 0).aspect(), 1.0);
        assert!((SurfaceSize::new(1920, 1080).aspect() - 16.0 / 9.0).abs() < 1e-6);
    }
}
