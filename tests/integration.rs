//! Integration tests for rawdecode.
//!
//! These tests drive the public API with synthetic camera files:
//! - Sony ARW2 strips, tiled lossless JPEG DNGs and headerless dumps
//! - Camera database crops, levels and support checks
//! - Container detection and decoder identification
//! - Robustness against truncated and corrupted input

mod integration {
    pub mod test_utils;

    pub mod container_tests;
    pub mod decode_tests;
    pub mod property_tests;
}
