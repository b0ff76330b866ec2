//! Configuration types and loading
//!
//! Upload thresholds and storage disk definitions.

use serde::{Deserialize, Serialize};

/// Name of the disk files go to when the caller does not pick one
pub const DEFAULT_DISK: &str = "public";

/// Type tag used when the caller does not pick one
pub const DEFAULT_FILE_TYPE: &str = "attachment";

/// File attachment configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileConfig {
    /// Uploads larger than this many bytes are downsized if they are images
    pub image_max_filesize: u64,
    /// Target width in pixels for downsized images
    pub image_resize_width: u32,
    /// Disk used by callers that do not name one
    pub default_disk: String,
    /// Type tag used by callers that do not name one
    pub default_type: String,
    /// Storage disks available to the service
    pub disks: Vec<DiskConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DiskConfig {
    pub name: String,
    pub driver: DiskDriver,
    /// Root directory (local driver only)
    pub root: String,
    /// Public URL prefix for stored files
    pub url: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiskDriver {
    #[default]
    Local,
    Memory,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            image_max_filesize: 2048,
            image_resize_width: 1200,
            default_disk: DEFAULT_DISK.to_string(),
            default_type: DEFAULT_FILE_TYPE.to_string(),
            disks: vec![DiskConfig {
                name: DEFAULT_DISK.to_string(),
                driver: DiskDriver::Local,
                root: "storage/app/public".to_string(),
                url: "/storage".to_string(),
            }],
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl FileConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("IMAGE_MAX_FILESIZE") {
            config.image_max_filesize = parse_number("IMAGE_MAX_FILESIZE", &value)?;
        }
        if let Some(value) = lookup("IMAGE_RESIZE_WIDTH") {
            let width: u32 = parse_number("IMAGE_RESIZE_WIDTH", &value)?;
            if width == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "IMAGE_RESIZE_WIDTH".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.image_resize_width = width;
        }
        if let Some(disk) = lookup("FILE_DEFAULT_DISK") {
            config.default_disk = disk;
        }

        // The public disk can be relocated; other disks are added in code
        if let Some(public) = config.disks.iter_mut().find(|d| d.name == DEFAULT_DISK) {
            if let Some(root) = lookup("FILE_PUBLIC_ROOT") {
                public.root = root;
            }
            if let Some(url) = lookup("FILE_PUBLIC_URL") {
                public.url = url.trim_end_matches('/').to_string();
            }
        }

        tracing::debug!(
            image_max_filesize = config.image_max_filesize,
            image_resize_width = config.image_resize_width,
            default_disk = %config.default_disk,
            "File configuration loaded"
        );

        Ok(config)
    }

    /// Add a disk definition, replacing one with the same name
    pub fn with_disk(mut self, disk: DiskConfig) -> Self {
        self.disks.retain(|d| d.name != disk.name);
        self.disks.push(disk);
        self
    }

    /// Look up a disk definition by name
    pub fn disk(&self, name: &str) -> Option<&DiskConfig> {
        self.disks.iter().find(|d| d.name == name)
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
