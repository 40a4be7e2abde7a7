use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Decoded RGBA8 image, rows top to bottom.
#[derive(Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub label: String,
}

pub type TextureHandle = Arc<TextureImage>;

impl fmt::Debug for TextureImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureImage")
            .field("label", &self.label)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl TextureImage {
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>, label: impl Into<String>) -> Self {
        debug_assert_eq!(rgba.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            rgba,
            label: label.into(),
        }
    }

    /// Texel at integer coordinates, clamped to the edges.
    pub fn texel(&self, x: i64, y: i64) -> [u8; 4] {
        if self.width == 0 || self.height == 0 {
            return [0, 0, 0, 0];
        }
        let x = x.clamp(0, i64::from(self.width) - 1) as usize;
        let y = y.clamp(0, i64::from(self.height) - 1) as usize;
        let offset = (y * self.width as usize + x) * 4;
        [
            self.rgba[offset],
            self.rgba[offset + 1],
            self.rgba[offset + 2],
            self.rgba[offset + 3],
        ]
    }

    /// Nearest-neighbour sample at normalized coordinates, `v = 0` at the top.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let x = (u * self.width as f32).floor() as i64;
        let y = (v * self.height as f32).floor() as i64;
        let texel = self.texel(x, y);
        [
            f32::from(texel[0]) / 255.0,
            f32::from(texel[1]) / 255.0,
            f32::from(texel[2]) / 255.0,
            f32::from(texel[3]) / 255.0,
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageDecodeError {
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("malformed data url")]
    DataUrl,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub fn decode_image(bytes: &[u8], label: impl Into<String>) -> Result<TextureImage, ImageDecodeError> {
    let decoded = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = decoded.dimensions();
    Ok(TextureImage::from_rgba(
        width,
        height,
        decoded.into_raw(),
        label,
    ))
}

/// Encodes raw image bytes as a `data:` URL, the durable store's value format.
pub fn encode_data_url(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Accepts a `data:<mime>;base64,<payload>` URL or a bare base64 payload.
pub fn decode_data_url(value: &str) -> Result<Vec<u8>, ImageDecodeError> {
    let payload = match value.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or(ImageDecodeError::DataUrl)?;
            if !header.ends_with(";base64") {
                return Err(ImageDecodeError::DataUrl);
            }
            payload
        }
        None => value,
    };
    Ok(STANDARD.decode(payload.trim())?)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;

    /// PNG bytes of a horizontal gradient `width` pixels wide.
    pub(crate) fn gradient_png(width: u32, seed: u8) -> Vec<u8> {
        let img = image::RgbaImage::from_fn(width, 1, |x, _| {
            image::Rgba([(x * 255 / width.max(1)) as u8, seed, 255 - seed, 255])
        });
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png)
            .expect("encode png");
        bytes.into_inner()
    }

    #[test]
    fn decodes_png_to_rgba() {
        let png = gradient_png(8, 40);
        let texture = decode_image(&png, "curve 1").unwrap();
        assert_eq!((texture.width, texture.height), (8, 1));
        assert_eq!(texture.rgba.len(), 8 * 4);
        assert_eq!(texture.texel(0, 0), [0, 40, 215, 255]);
        assert_eq!(texture.label, "curve 1");
    }

    #[test]
    fn data_url_carries_mime_and_payload() {
        let png = gradient_png(4, 0);
        let url = encode_data_url(&png);
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_url(&url).unwrap(), png);
    }

    #[test]
    fn bare_base64_is_accepted() {
        let encoded = STANDARD.encode(b"abc");
        assert_eq!(decode_data_url(&encoded).unwrap(), b"abc");
    }

    #[test]
    fn rejects_non_base64_data_url() {
        assert!(matches!(
            decode_data_url("data:image/png,raw"),
            Err(ImageDecodeError::DataUrl)
        ));
    }

    #[test]
    fn sample_clamps_to_edges() {
        let texture = TextureImage::from_rgba(2, 1, vec![0, 0, 0, 255, 255, 255, 255, 255], "t");
        assert_eq!(texture.sample(-0.5, 0.0), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(texture.sample(1.5, 0.0), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(texture.sample(0.75, 0.5), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_image(b"not an image", "x").is_err());
    }
}
