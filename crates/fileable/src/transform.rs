//! Image Transform
//!
//! Resize, crop, and fit for uploaded JPEG and PNG images.
//!
//! The source is decoded once when the builder is created. Its aspect ratio
//! (height / width) is captured at that point and every size that omits a
//! height is derived from it, so successive size changes never compound.
//!
//! ```rust,ignore
//! let bytes = ImageTransform::builder(&upload)?
//!     .size(1200, None)
//!     .build()
//!     .to_stream(MakeMode::Resize)?;
//! ```

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use bytes::Bytes;
use fileable_core::DEFAULT_DISK;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::error::{FileError, FileResult};
use crate::model::UploadedFile;
use crate::storage::Disks;

/// Ratio used when the source reports a zero width
pub const DEFAULT_RATIO: f64 = 0.75;

/// JPEG quality for re-encoded images
const JPEG_QUALITY: u8 = 90;

/// How `make` turns the source into the target size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MakeMode {
    /// Scale to exactly the target size, ignoring the aspect ratio
    Resize,
    /// Cut the target size out of the source at the configured coordinates
    Crop,
    /// Scale to cover the target size, keeping the aspect ratio, then cut
    /// at the fit position
    #[default]
    Fit,
}

/// Anchor used by fit mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitPosition {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Start,
    Middle,
    End,
}

impl Align {
    fn offset(self, free: u32) -> u32 {
        match self {
            Align::Start => 0,
            Align::Middle => free / 2,
            Align::End => free,
        }
    }
}

impl FitPosition {
    pub const ALL: [FitPosition; 9] = [
        Self::TopLeft,
        Self::Top,
        Self::TopRight,
        Self::Left,
        Self::Center,
        Self::Right,
        Self::BottomRight,
        Self::Bottom,
        Self::BottomLeft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::Top => "top",
            Self::TopRight => "top-right",
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
            Self::BottomRight => "bottom-right",
            Self::Bottom => "bottom",
            Self::BottomLeft => "bottom-left",
        }
    }

    /// (horizontal, vertical) alignment
    fn align(&self) -> (Align, Align) {
        match self {
            Self::TopLeft => (Align::Start, Align::Start),
            Self::Top => (Align::Middle, Align::Start),
            Self::TopRight => (Align::End, Align::Start),
            Self::Left => (Align::Start, Align::Middle),
            Self::Center => (Align::Middle, Align::Middle),
            Self::Right => (Align::End, Align::Middle),
            Self::BottomRight => (Align::End, Align::End),
            Self::Bottom => (Align::Middle, Align::End),
            Self::BottomLeft => (Align::Start, Align::End),
        }
    }
}

impl FromStr for FitPosition {
    type Err = FileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| FileError::InvalidArgument(format!("unknown fit position {:?}", s)))
    }
}

impl fmt::Display for FitPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intermediate size and crop offset of a fit operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitGeometry {
    pub scaled: (u32, u32),
    pub offset: (u32, u32),
}

/// Scale `source` to cover `target` keeping its ratio, then place the
/// target window according to `position`.
pub fn fit_geometry(source: (u32, u32), target: (u32, u32), position: FitPosition) -> FitGeometry {
    let (sw, sh) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let (tw, th) = target;

    let scale = f64::max(tw as f64 / sw, th as f64 / sh);
    let scaled = (
        ((sw * scale).round() as u32).max(tw),
        ((sh * scale).round() as u32).max(th),
    );

    let (horizontal, vertical) = position.align();
    FitGeometry {
        scaled,
        offset: (
            horizontal.offset(scaled.0 - tw),
            vertical.offset(scaled.1 - th),
        ),
    }
}

/// Height for `width` at the given height/width ratio
pub fn derive_height(width: u32, ratio: f64) -> u32 {
    ((width as f64 * ratio).round() as u32).max(1)
}

/// An immutable transform: decoded source plus target settings
#[derive(Debug, Clone)]
pub struct ImageTransform {
    image: DynamicImage,
    format: ImageFormat,
    natural_size: (u32, u32),
    ratio: f64,
    size: (u32, u32),
    coordinates: Option<(u32, u32)>,
    fit_position: FitPosition,
    disk: String,
    folder: String,
    file_name: String,
}

/// Builder for [`ImageTransform`]
#[derive(Debug, Clone)]
pub struct ImageTransformBuilder {
    transform: ImageTransform,
}

impl ImageTransform {
    /// Decode an upload and start configuring a transform.
    ///
    /// Only jpg, jpeg and png extensions are accepted (case-insensitive).
    /// The working size starts at the natural size and the output name at
    /// the client filename.
    pub fn builder(upload: &UploadedFile) -> FileResult<ImageTransformBuilder> {
        if !upload.has_image_extension() {
            return Err(FileError::UnsupportedMediaType(upload.extension().to_string()));
        }

        let invalid = |e: image::ImageError| {
            FileError::InvalidArgument(format!("{} is not a readable image: {}", upload.original_name, e))
        };
        let format = image::guess_format(&upload.data).map_err(invalid)?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Err(FileError::InvalidArgument(format!(
                "{} contains {:?} data",
                upload.original_name, format
            )));
        }
        let image = image::load_from_memory_with_format(&upload.data, format).map_err(invalid)?;

        let natural_size = image.dimensions();
        let ratio = if natural_size.0 == 0 {
            DEFAULT_RATIO
        } else {
            natural_size.1 as f64 / natural_size.0 as f64
        };

        debug!(
            name = %upload.original_name,
            width = natural_size.0,
            height = natural_size.1,
            ratio,
            "Image decoded"
        );

        Ok(ImageTransformBuilder {
            transform: ImageTransform {
                image,
                format,
                natural_size,
                ratio,
                size: natural_size,
                coordinates: None,
                fit_position: FitPosition::default(),
                disk: DEFAULT_DISK.to_string(),
                folder: String::new(),
                file_name: upload.original_name.clone(),
            },
        })
    }

    /// Target (width, height)
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Size of the decoded source
    pub fn natural_size(&self) -> (u32, u32) {
        self.natural_size
    }

    /// Source height / width, captured at decode time
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn coordinates(&self) -> Option<(u32, u32)> {
        self.coordinates
    }

    pub fn fit_position(&self) -> FitPosition {
        self.fit_position
    }

    pub fn disk(&self) -> &str {
        &self.disk
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Format the output is encoded in (same as the source)
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// `<folder>/<file_name>`, folder trimmed of slashes
    pub fn output_path(&self) -> String {
        let folder = self.folder.trim_matches('/');
        if folder.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", folder, self.file_name)
        }
    }

    fn make(&self, mode: MakeMode) -> FileResult<DynamicImage> {
        let (width, height) = self.size;
        if width == 0 || height == 0 {
            return Err(FileError::InvalidArgument(format!(
                "target size {}x{} must be non-zero",
                width, height
            )));
        }

        let image = match mode {
            MakeMode::Resize => self.image.resize_exact(width, height, FilterType::Triangle),
            MakeMode::Crop => self.crop(width, height),
            MakeMode::Fit => {
                let geometry = fit_geometry(self.natural_size, self.size, self.fit_position);
                self.image
                    .resize_exact(geometry.scaled.0, geometry.scaled.1, FilterType::Triangle)
                    .crop_imm(geometry.offset.0, geometry.offset.1, width, height)
            }
        };

        debug!(
            mode = ?mode,
            from = ?self.natural_size,
            to = ?image.dimensions(),
            "Image transformed"
        );

        Ok(image)
    }

    /// Cut a `width` x `height` window. Without coordinates the window is
    /// centered on the source. Parts of the window outside the source are
    /// transparent (black once written as JPEG).
    fn crop(&self, width: u32, height: u32) -> DynamicImage {
        let (natural_width, natural_height) = self.natural_size;
        let (x, y) = match self.coordinates {
            Some((x, y)) => (x as i64, y as i64),
            None => (
                (natural_width as i64 - width as i64) / 2,
                (natural_height as i64 - height as i64) / 2,
            ),
        };

        let inside = x >= 0
            && y >= 0
            && x + width as i64 <= natural_width as i64
            && y + height as i64 <= natural_height as i64;
        if inside {
            return self.image.crop_imm(x as u32, y as u32, width, height);
        }

        let mut canvas = RgbaImage::new(width, height);
        imageops::overlay(&mut canvas, &self.image.to_rgba8(), -x, -y);
        DynamicImage::ImageRgba8(canvas)
    }

    /// Transform and encode in memory
    #[instrument(skip(self), fields(file_name = %self.file_name))]
    pub fn to_stream(&self, mode: MakeMode) -> FileResult<Bytes> {
        let image = self.make(mode)?;

        let (image, output) = match self.format {
            // JPEG has no alpha channel
            ImageFormat::Jpeg => (
                DynamicImage::ImageRgb8(image.to_rgb8()),
                ImageOutputFormat::Jpeg(JPEG_QUALITY),
            ),
            _ => (image, ImageOutputFormat::Png),
        };

        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, output)
            .map_err(|e| FileError::Encode(e.to_string()))?;

        Ok(Bytes::from(buffer.into_inner()))
    }

    /// Transform and write to the configured disk, returning the path
    #[instrument(skip(self, disks), fields(disk = %self.disk))]
    pub async fn try_save(&self, mode: MakeMode, disks: &Disks) -> FileResult<String> {
        let disk = disks
            .get(&self.disk)
            .ok_or_else(|| FileError::UnknownDisk(self.disk.clone()))?;

        let path = self.output_path();
        let data = self.to_stream(mode)?;
        disk.put(&path, data).await?;

        Ok(path)
    }

    /// Best-effort variant of [`try_save`](Self::try_save): failures are
    /// logged and reported as `None`.
    pub async fn save(&self, mode: MakeMode, disks: &Disks) -> Option<String> {
        match self.try_save(mode, disks).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!(
                    error = %e,
                    disk = %self.disk,
                    path = %self.output_path(),
                    "Failed to save image"
                );
                None
            }
        }
    }
}

impl ImageTransformBuilder {
    /// Set the target size. Without a height, the height is derived from the
    /// source ratio.
    pub fn size(mut self, width: u32, height: Option<u32>) -> Self {
        let height = height.unwrap_or_else(|| derive_height(width, self.transform.ratio));
        self.transform.size = (width, height);
        self
    }

    /// Crop anchor (crop mode only)
    pub fn coordinates(mut self, x: u32, y: u32) -> Self {
        self.transform.coordinates = Some((x, y));
        self
    }

    /// Fit anchor (fit mode only)
    pub fn fit_position(mut self, position: FitPosition) -> Self {
        self.transform.fit_position = position;
        self
    }

    pub fn disk(mut self, disk: impl Into<String>) -> Self {
        self.transform.disk = disk.into();
        self
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.transform.folder = folder.into();
        self
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.transform.file_name = file_name.into();
        self
    }

    /// Target size as currently configured
    pub fn target_size(&self) -> (u32, u32) {
        self.transform.size
    }

    pub fn build(self) -> ImageTransform {
        self.transform
    }
}
