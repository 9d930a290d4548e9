//! Command-line configuration for the `rawdecode` tool.
//!
//! This module provides the CLI surface:
//! - Subcommands via clap derive (`decode`, `identify`, `dump`)
//! - Environment variables with the `RAWDECODE_` prefix
//! - Conversion into the library's [`DecodeOptions`]
//!
//! # Environment Variables
//!
//! - `RAWDECODE_THREADS` - Worker threads, 0 for one per core (default: 0)
//! - `RAWDECODE_FAIL_ON_UNKNOWN` - Refuse cameras missing from the database
//! - `RAWDECODE_CAMERA_DB` - Path to the JSON camera database
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use rawdecode::config::{Cli, Command};
//!
//! match Cli::parse().command {
//!     Command::Decode(config) => println!("decoding {}", config.file.display()),
//!     Command::Identify(config) => println!("identifying {}", config.file.display()),
//!     Command::Dump(config) => println!("dumping {}", config.file.display()),
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::camera::CameraDb;
use crate::decoders::DecodeOptions;
use crate::error::CameraDbError;

// =============================================================================
// Default Values
// =============================================================================

/// Default worker thread count (one per core).
pub const DEFAULT_THREADS: usize = 0;

/// Upper bound accepted for `--threads`.
pub const MAX_THREADS: usize = 1024;

/// Default number of values shown per entry by `dump`.
pub const DEFAULT_DUMP_VALUES: usize = 8;

// =============================================================================
// CLI Arguments
// =============================================================================

/// rawdecode - decode camera RAW files to sensor data.
#[derive(Parser, Debug, Clone)]
#[command(name = "rawdecode")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Decode a RAW file and report its image and metadata
    Decode(DecodeConfig),

    /// Print the container, camera and decoder chosen for a file
    Identify(IdentifyConfig),

    /// Print the directory tree of a file
    Dump(DumpConfig),
}

/// How reports are printed.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON document
    Json,
}

// =============================================================================
// decode
// =============================================================================

/// Options for `rawdecode decode`.
#[derive(Args, Debug, Clone)]
pub struct DecodeConfig {
    /// RAW file to decode.
    pub file: PathBuf,

    /// Worker threads for banded codecs, 0 for one per core.
    #[arg(long, default_value_t = DEFAULT_THREADS, env = "RAWDECODE_THREADS")]
    pub threads: usize,

    /// Refuse cameras missing from the camera database.
    #[arg(long, default_value_t = false, env = "RAWDECODE_FAIL_ON_UNKNOWN")]
    pub fail_on_unknown: bool,

    /// JSON camera database.
    #[arg(long, env = "RAWDECODE_CAMERA_DB")]
    pub camera_db: Option<PathBuf>,

    /// Keep the full sensor area instead of the camera's crop.
    #[arg(long, default_value_t = false)]
    pub no_crop: bool,

    /// Keep linearization tables on the image instead of applying them.
    #[arg(long, default_value_t = false)]
    pub uncorrected: bool,

    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Write the cropped first component as a 16-bit binary PGM.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DecodeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.file.as_os_str().is_empty() {
            return Err("an input file is required".to_string());
        }
        if self.threads > MAX_THREADS {
            return Err(format!("threads must be at most {MAX_THREADS}"));
        }
        if let Some(ref output) = self.output {
            if output == &self.file {
                return Err("output would overwrite the input file".to_string());
            }
        }
        if let Some(ref db) = self.camera_db {
            if db.as_os_str().is_empty() {
                return Err(
                    "camera_db path is empty. Set --camera-db or RAWDECODE_CAMERA_DB".to_string(),
                );
            }
        }
        Ok(())
    }

    /// Library options for this invocation, loading the camera database.
    pub fn decode_options(&self) -> Result<DecodeOptions, CameraDbError> {
        Ok(DecodeOptions {
            threads: self.threads,
            fail_on_unknown: self.fail_on_unknown,
            apply_crop: !self.no_crop,
            uncorrected_raw_values: self.uncorrected,
            cameras: load_cameras(self.camera_db.as_ref())?,
            ..DecodeOptions::default()
        })
    }
}

// =============================================================================
// identify
// =============================================================================

/// Options for `rawdecode identify`.
#[derive(Args, Debug, Clone)]
pub struct IdentifyConfig {
    /// RAW file to identify.
    pub file: PathBuf,

    /// JSON camera database, needed to recognise headerless files.
    #[arg(long, env = "RAWDECODE_CAMERA_DB")]
    pub camera_db: Option<PathBuf>,

    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl IdentifyConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.file.as_os_str().is_empty() {
            return Err("an input file is required".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// dump
// =============================================================================

/// Options for `rawdecode dump`.
#[derive(Args, Debug, Clone)]
pub struct DumpConfig {
    /// File whose directories are printed.
    pub file: PathBuf,

    /// Values previewed per entry.
    #[arg(long, default_value_t = DEFAULT_DUMP_VALUES)]
    pub max_values: usize,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DumpConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.file.as_os_str().is_empty() {
            return Err("an input file is required".to_string());
        }
        if self.max_values == 0 {
            return Err("max_values must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Command {
    /// Whether debug logging was requested.
    pub fn verbose(&self) -> bool {
        match self {
            Command::Decode(c) => c.verbose,
            Command::Identify(c) => c.verbose,
            Command::Dump(c) => c.verbose,
        }
    }
}

/// Load the camera database at `path`, or an empty one.
pub fn load_cameras(path: Option<&PathBuf>) -> Result<Arc<CameraDb>, CameraDbError> {
    let db = match path {
        Some(path) => CameraDb::load(path)?,
        None => CameraDb::empty(),
    };
    Ok(Arc::new(db))
}

// =============================================================================
// Tests
// =============================================================================
