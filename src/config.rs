//! Process-wide configuration (ambient concern A1).
//!
//! Flags are parsed with `clap` and may be overridden by environment
//! variables of the same name, mirroring the CLI surface named in spec §6.
//! `ServerConfig` is validated once at startup and then wrapped in an `Arc`
//! and threaded through the router state rather than read as a global.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Supported output image formats (TransformParams.format, spec §3).
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    jpeg,
    webp,
    png,
}

impl ImageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::webp => "image/webp",
            ImageFormat::jpeg => "image/jpeg",
            ImageFormat::png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::webp => "webp",
            ImageFormat::jpeg => "jpeg",
            ImageFormat::png => "png",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "imgserve", about = "On-demand image transform server")]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(long, env = "PORT", default_value_t = 9000)]
    pub port: u16,

    /// Root directory of source images.
    #[arg(long, env = "IMAGES_DIR", default_value = "./images")]
    pub images_dir: PathBuf,

    /// Root directory of the on-disk transform cache.
    #[arg(long, env = "CACHE_DIR", default_value = "./cache")]
    pub cache_dir: PathBuf,

    /// Print the resolved configuration as JSON and exit without starting
    /// the server.
    #[arg(long, default_value_t = false)]
    pub dump: bool,

    /// Walk the image root at startup and warm the cache at default params.
    #[arg(long, env = "PRECACHE", default_value_t = false)]
    pub precache: bool,

    /// Worker count for the pre-cache scan. 0 means "auto" (hardware parallelism).
    #[arg(long, env = "PRECACHE_WORKERS", default_value_t = 0)]
    pub precache_workers: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub images_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub precache: bool,
    pub precache_workers: usize,
    pub request_timeout: Duration,
    pub pool_size: usize,
    pub queue_depth: usize,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("port must be in 1..=65535, got {0}")]
    InvalidPort(u16),
    #[error("images_dir does not exist or is not a directory: {0}")]
    InvalidImagesDir(PathBuf),
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> Self {
        let pool_size = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let precache_workers = if cli.precache_workers == 0 {
            pool_size
        } else {
            cli.precache_workers
        };
        Self {
            port: cli.port,
            images_dir: cli.images_dir,
            cache_dir: cli.cache_dir,
            precache: cli.precache,
            precache_workers,
            request_timeout: Duration::from_secs(30),
            pool_size,
            queue_depth: pool_size * 4,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if !self.images_dir.is_dir() {
            return Err(ConfigError::InvalidImagesDir(self.images_dir.clone()));
        }
        Ok(())
    }
}
