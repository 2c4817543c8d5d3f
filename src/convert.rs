// src/convert.rs

//! Image conversion
//!
//! The pipeline treats conversion as an opaque `bytes -> bytes` operation
//! behind the [`Converter`] trait. [`ImageConverter`] decodes anything the
//! `image` crate recognizes and re-encodes it in the configured target format.
//!
//! Output files are named after the source stem. If that name is taken, a
//! numeric suffix is added (`photo_1.webp`, `photo_2.webp`, ...). The name is
//! claimed with `create_new`, so two workers can never write the same target.

use crate::error::{Error, Result};
use image::{DynamicImage, ImageFormat};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Give up looking for a free output name after this many suffixes
const MAX_NAME_SUFFIX: u32 = 10_000;

/// Output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFormat {
    #[default]
    Webp,
    Png,
    Jpeg,
    Bmp,
    Tiff,
    Gif,
}

impl TargetFormat {
    /// File extension written for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Gif => "gif",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            Self::Webp => ImageFormat::WebP,
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Bmp => ImageFormat::Bmp,
            Self::Tiff => ImageFormat::Tiff,
            Self::Gif => ImageFormat::Gif,
        }
    }

    /// Coerce a decoded image into a pixel layout the encoder accepts
    fn prepare(&self, img: DynamicImage) -> DynamicImage {
        match self {
            // No alpha channel in JPEG
            Self::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
            Self::Png | Self::Tiff => img,
            Self::Webp | Self::Bmp | Self::Gif => DynamicImage::ImageRgba8(img.to_rgba8()),
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Webp => "webp",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Gif => "gif",
        })
    }
}

impl FromStr for TargetFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "webp" => Ok(Self::Webp),
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "bmp" => Ok(Self::Bmp),
            "tiff" | "tif" => Ok(Self::Tiff),
            "gif" => Ok(Self::Gif),
            other => Err(Error::Config(format!("unsupported target format: {}", other))),
        }
    }
}

/// Turns source bytes into target bytes
pub trait Converter: Send + Sync {
    /// Extension (without dot) for files this converter produces
    fn target_extension(&self) -> &str;

    /// Convert `data`; `source` is only used for error reporting
    fn convert(&self, source: &Path, data: &[u8]) -> Result<Vec<u8>>;
}

/// [`Converter`] backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageConverter {
    format: TargetFormat,
}

impl ImageConverter {
    pub fn new(format: TargetFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> TargetFormat {
        self.format
    }
}

impl Converter for ImageConverter {
    fn target_extension(&self) -> &str {
        self.format.extension()
    }

    fn convert(&self, source: &Path, data: &[u8]) -> Result<Vec<u8>> {
        let conversion_err = |reason: String| Error::Conversion {
            path: source.to_path_buf(),
            reason,
        };

        let img = image::load_from_memory(data).map_err(|e| conversion_err(e.to_string()))?;
        let img = self.format.prepare(img);

        let mut out = Vec::with_capacity(data.len());
        img.write_to(&mut Cursor::new(&mut out), self.format.image_format())
            .map_err(|e| conversion_err(e.to_string()))?;

        Ok(out)
    }
}

fn candidate_name(stem: &str, extension: &str, suffix: u32) -> String {
    if suffix == 0 {
        format!("{}.{}", stem, extension)
    } else {
        format!("{}_{}.{}", stem, suffix, extension)
    }
}

/// Write converted bytes under `output_dir`, picking a free name
///
/// Returns the path written. On a write failure the partial file is removed.
pub fn write_output(output_dir: &Path, source: &Path, extension: &str, data: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());

    for suffix in 0..MAX_NAME_SUFFIX {
        let target = output_dir.join(candidate_name(&stem, extension, suffix));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        };

        let written = file.write_all(data).and_then(|_| file.sync_all());
        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&target);
            return Err(e.into());
        }

        debug!("Wrote {} bytes to {}", data.len(), target.display());
        return Ok(target);
    }

    Err(Error::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!(
            "no free output name for '{}' in {}",
            stem,
            output_dir.display()
        ),
    )))
}
