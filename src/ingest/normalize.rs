use anyhow::{anyhow, Result};

/// Pixel encodings accepted on the wire. Names follow the usual sensor image
/// message conventions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelEncoding {
    Float32,
    Mono8,
    Mono16,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
}

impl PixelEncoding {
    pub(crate) fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "32fc1" => Ok(Self::Float32),
            "mono8" | "8uc1" => Ok(Self::Mono8),
            "mono16" | "16uc1" => Ok(Self::Mono16),
            "rgb8" => Ok(Self::Rgb8),
            "bgr8" => Ok(Self::Bgr8),
            "rgba8" => Ok(Self::Rgba8),
            "bgra8" => Ok(Self::Bgra8),
            other => Err(anyhow!("unsupported image encoding '{}'", other)),
        }
    }

    pub(crate) fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Mono8 => 1,
            Self::Mono16 => 2,
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Float32 | Self::Rgba8 | Self::Bgra8 => 4,
        }
    }
}

/// Convert a row-padded image buffer into tightly packed single-channel `f32`.
///
/// `step` is the row stride in bytes. Color encodings are reduced to luma.
pub(crate) fn normalize_to_f32(
    data: &[u8],
    width: u32,
    height: u32,
    step: u32,
    encoding: PixelEncoding,
    big_endian: bool,
) -> Result<Vec<f32>> {
    if width == 0 || height == 0 {
        return Err(anyhow!("image dimensions must be non-zero ({}x{})", width, height));
    }
    let w = width as usize;
    let h = height as usize;
    let step = step as usize;
    let bpp = encoding.bytes_per_pixel();
    let row_len = w
        .checked_mul(bpp)
        .ok_or_else(|| anyhow!("image row length overflows"))?;
    if step < row_len {
        return Err(anyhow!(
            "image step {} is shorter than a {}-pixel row ({} bytes)",
            step,
            w,
            row_len
        ));
    }
    let expected = step
        .checked_mul(h)
        .ok_or_else(|| anyhow!("image dimensions overflow"))?;
    if data.len() < expected {
        return Err(anyhow!(
            "image data truncated: expected at least {} bytes, got {}",
            expected,
            data.len()
        ));
    }

    let mut out = Vec::with_capacity(w * h);
    for row in data.chunks_exact(step).take(h) {
        for px in row[..row_len].chunks_exact(bpp) {
            out.push(convert_pixel(px, encoding, big_endian));
        }
    }
    Ok(out)
}

fn convert_pixel(px: &[u8], encoding: PixelEncoding, big_endian: bool) -> f32 {
    match encoding {
        PixelEncoding::Float32 => {
            let bytes = [px[0], px[1], px[2], px[3]];
            if big_endian {
                f32::from_be_bytes(bytes)
            } else {
                f32::from_le_bytes(bytes)
            }
        }
        PixelEncoding::Mono8 => px[0] as f32,
        PixelEncoding::Mono16 => {
            let bytes = [px[0], px[1]];
            if big_endian {
                u16::from_be_bytes(bytes) as f32
            } else {
                u16::from_le_bytes(bytes) as f32
            }
        }
        PixelEncoding::Rgb8 | PixelEncoding::Rgba8 => luma(px[0], px[1], px[2]),
        PixelEncoding::Bgr8 | PixelEncoding::Bgra8 => luma(px[2], px[1], px[0]),
    }
}

fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299_f32 * r as f32 + 0.587_f32 * g as f32 + 0.114_f32 * b as f32
}
