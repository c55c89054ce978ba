//! Spark Asset Pipeline
//!
//! File and codec collaborators: raw file reads, shader artifacts, RGBA8
//! image decode and PNG encode.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use image::RgbaImage;

/// SPIR-V magic number (first word of every module)
const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image codec error for {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid shader artifact {path}: {reason}")]
    InvalidShader { path: PathBuf, reason: String },

    #[error("pixel buffer holds {actual} bytes, {width}x{height} RGBA8 needs {expected}")]
    PixelBufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Encoding of a shader artifact on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderFormat {
    /// Pre-compiled SPIR-V binary (`.spv`)
    SpirV,
    /// WGSL source (`.wgsl`)
    Wgsl,
}

/// A shader artifact as loaded from disk
#[derive(Debug, Clone)]
pub struct ShaderArtifact {
    pub format: ShaderFormat,
    pub bytes: Vec<u8>,
}

/// Read an entire file into memory.
pub fn read_binary(path: &Path) -> Result<Vec<u8>, AssetError> {
    std::fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a shader artifact, picking the format from the file extension.
pub fn load_shader(path: &Path) -> Result<ShaderArtifact, AssetError> {
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("spv") => ShaderFormat::SpirV,
        Some("wgsl") => ShaderFormat::Wgsl,
        other => {
            return Err(AssetError::InvalidShader {
                path: path.to_path_buf(),
                reason: format!("unknown shader extension {other:?}"),
            })
        }
    };

    let bytes = read_binary(path)?;
    validate_shader(path, format, &bytes)?;
    tracing::debug!("Loaded shader {} ({} bytes)", path.display(), bytes.len());
    Ok(ShaderArtifact { format, bytes })
}

fn validate_shader(path: &Path, format: ShaderFormat, bytes: &[u8]) -> Result<(), AssetError> {
    let invalid = |reason: &str| AssetError::InvalidShader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    match format {
        ShaderFormat::SpirV => {
            if bytes.len() < 4 || bytes.len() % 4 != 0 {
                return Err(invalid("SPIR-V size is not a non-zero multiple of 4"));
            }
            let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if magic != SPIRV_MAGIC {
                return Err(invalid("missing SPIR-V magic number"));
            }
        }
        ShaderFormat::Wgsl => {
            if std::str::from_utf8(bytes).is_err() {
                return Err(invalid("WGSL source is not UTF-8"));
            }
        }
    }
    Ok(())
}

/// Decode an image file into tightly packed RGBA8 pixels.
pub fn load_rgba8(path: &Path) -> Result<RgbaImage, AssetError> {
    let image = image::open(path).map_err(|source| AssetError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let rgba = image.to_rgba8();
    tracing::debug!(
        "Loaded texture {} ({}x{})",
        path.display(),
        rgba.width(),
        rgba.height()
    );
    Ok(rgba)
}

/// Encode tightly packed RGBA8 pixels to a PNG file.
pub fn save_png(path: &Path, width: u32, height: u32, pixels: Vec<u8>) -> Result<(), AssetError> {
    let expected = width as usize * height as usize * 4;
    let actual = pixels.len();
    let image = RgbaImage::from_raw(width, height, pixels).ok_or(AssetError::PixelBufferSize {
        width,
        height,
        expected,
        actual,
    })?;
    image.save(path).map_err(|source| AssetError::Image {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spark_asset_tests");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{}_{}", std::process::id(), name))
    }

    #[test]
    fn png_round_trip() {
        let path = scratch("round_trip.png");
        let pixels: Vec<u8> = (0..4 * 3 * 4).map(|i| (i * 7) as u8).collect();
        save_png(&path, 4, 3, pixels.clone()).unwrap();

        let loaded = load_rgba8(&path).unwrap();
        assert_eq!(loaded.dimensions(), (4, 3));
        assert_eq!(loaded.into_raw(), pixels);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn short_pixel_buffer_is_rejected() {
        let err = save_png(&scratch("short.png"), 4, 4, vec![0; 10]).unwrap_err();
        assert!(matches!(
            err,
            AssetError::PixelBufferSize {
                expected: 64,
                actual: 10,
                ..
            }
        ));
    }

    #[test]
    fn spirv_without_magic_is_rejected() {
        let path = scratch("bad.spv");
        std::fs::write(&path, [1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let err = load_shader(&path).unwrap_err();
        assert!(matches!(err, AssetError::InvalidShader { .. }));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn spirv_with_magic_loads() {
        let path = scratch("ok.spv");
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 16]);
        std::fs::write(&path, &bytes).unwrap();
        let artifact = load_shader(&path).unwrap();
        assert_eq!(artifact.format, ShaderFormat::SpirV);
        assert_eq!(artifact.bytes, bytes);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_shader(Path::new("shader.glsl")).unwrap_err();
        assert!(matches!(err, AssetError::InvalidShader { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_binary(Path::new("no/such/file.bin")).unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
    }
}
