//! Camera database.
//!
//! A read-only lookup of per-model calibration keyed by `(make, model,
//! mode)`: crop, black and white levels per ISO range, masked areas, CFA
//! layout and decoder hints. The database is loaded from JSON:
//!
//! ```json
//! {
//!   "cameras": [{
//!     "make": "SONY", "model": "DSLR-A100",
//!     "crop": { "x": 0, "y": 0, "width": -8, "height": 0 },
//!     "sensors": [{ "black": 512, "white": 16383 }],
//!     "cfa": ["RED", "GREEN", "GREEN", "BLUE"]
//!   }],
//!   "naked": [{
//!     "make": "CANON", "model": "PowerShot Pro70", "file_size": 1397760,
//!     "width": 1552, "height": 1200, "bits": 10, "order": "plain"
//!   }]
//! }
//! ```
//!
//! An empty database is valid; every lookup then misses.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec::BitOrder;
use crate::error::CameraDbError;
use crate::image::{BlackArea, CfaColor, ColorFilterArray, Rect};

fn default_true() -> bool {
    true
}

fn default_cfa_side() -> usize {
    2
}

/// Crop relative to the full sensor. A width or height of zero or less is
/// measured from the far edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CropSpec {
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

impl CropSpec {
    /// Resolve against an image of `width` x `height`.
    pub fn resolve(&self, width: i64, height: i64) -> Rect {
        let w = if self.width <= 0 {
            width - self.x + self.width
        } else {
            self.width
        };
        let h = if self.height <= 0 {
            height - self.y + self.height
        } else {
            self.height
        };
        Rect::new(self.x, self.y, w, h)
    }
}

/// Black and white levels valid for an ISO range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub black: i32,
    pub white: i32,
    #[serde(default)]
    pub black_separate: Vec<i32>,
    #[serde(default)]
    pub min_iso: u32,
    /// Upper bound of the range, 0 for unbounded
    #[serde(default)]
    pub max_iso: u32,
}

impl SensorInfo {
    /// An entry without an ISO range applies to every ISO.
    pub fn is_default(&self) -> bool {
        self.min_iso == 0 && self.max_iso == 0
    }

    pub fn covers_iso(&self, iso: u32) -> bool {
        iso >= self.min_iso && (self.max_iso == 0 || iso <= self.max_iso)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackAreaSpec {
    #[serde(default)]
    pub vertical: bool,
    pub offset: i64,
    pub size: i64,
}

impl From<BlackAreaSpec> for BlackArea {
    fn from(spec: BlackAreaSpec) -> Self {
        BlackArea::new(spec.offset, spec.size, spec.vertical)
    }
}

/// One camera mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub make: String,
    pub model: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub canonical_make: Option<String>,
    #[serde(default)]
    pub canonical_model: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_true")]
    pub supported: bool,
    /// Lowest decoder version able to handle this camera
    #[serde(default)]
    pub decoder_version: u32,
    #[serde(default)]
    pub cfa: Vec<String>,
    #[serde(default = "default_cfa_side")]
    pub cfa_width: usize,
    #[serde(default = "default_cfa_side")]
    pub cfa_height: usize,
    #[serde(default)]
    pub crop: Option<CropSpec>,
    #[serde(default)]
    pub sensors: Vec<SensorInfo>,
    #[serde(default)]
    pub black_areas: Vec<BlackAreaSpec>,
    #[serde(default)]
    pub hints: HashMap<String, String>,
}

impl Camera {
    fn matches(&self, make: &str, model: &str, mode: &str) -> bool {
        self.make.trim() == make
            && self.mode == mode
            && (self.model.trim() == model || self.aliases.iter().any(|a| a.trim() == model))
    }

    pub fn hint(&self, name: &str) -> Option<&str> {
        self.hints.get(name).map(String::as_str)
    }

    /// Levels for `iso`: the first ranged entry covering it, else the
    /// default entry, else the first entry.
    pub fn sensor_for_iso(&self, iso: u32) -> Option<&SensorInfo> {
        if self.sensors.len() == 1 {
            return self.sensors.first();
        }
        self.sensors
            .iter()
            .find(|s| !s.is_default() && s.covers_iso(iso))
            .or_else(|| self.sensors.iter().find(|s| s.is_default()))
            .or_else(|| self.sensors.first())
    }

    /// The CFA pattern, if the entry lists one.
    pub fn cfa_pattern(&self) -> Result<Option<ColorFilterArray>, String> {
        if self.cfa.is_empty() {
            return Ok(None);
        }
        let colors = self
            .cfa
            .iter()
            .map(|c| c.parse::<CfaColor>())
            .collect::<Result<Vec<_>, _>>()?;
        ColorFilterArray::from_colors(self.cfa_width, self.cfa_height, colors)
            .map(Some)
            .ok_or_else(|| {
                format!(
                    "{} colors do not fill a {}x{} CFA",
                    self.cfa.len(),
                    self.cfa_width,
                    self.cfa_height
                )
            })
    }
}

/// A headerless file recognised by its exact size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NakedCamera {
    pub make: String,
    pub model: String,
    pub file_size: u64,
    pub width: usize,
    pub height: usize,
    pub bits: u32,
    #[serde(default)]
    pub offset: usize,
    /// Bit order name: `plain`, `msb`, `msb16` or `msb32`
    #[serde(default = "NakedCamera::default_order")]
    pub order: String,
}

impl NakedCamera {
    fn default_order() -> String {
        "plain".to_string()
    }

    pub fn bit_order(&self) -> Option<BitOrder> {
        BitOrder::from_name(&self.order)
    }
}

/// The loaded database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraDb {
    #[serde(default)]
    pub cameras: Vec<Camera>,
    #[serde(default)]
    pub naked: Vec<NakedCamera>,
}

impl CameraDb {
    /// A database without entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON database.
    pub fn from_json(json: &str) -> Result<Self, CameraDbError> {
        let db: CameraDb =
            serde_json::from_str(json).map_err(|e| CameraDbError::Parse(e.to_string()))?;
        db.validate()?;
        debug!(
            cameras = db.cameras.len(),
            naked = db.naked.len(),
            "camera database parsed"
        );
        Ok(db)
    }

    /// Read a JSON database from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CameraDbError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| CameraDbError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let db = Self::from_json(&json)?;
        info!(path = %path.display(), cameras = db.cameras.len(), "loaded camera database");
        Ok(db)
    }

    fn validate(&self) -> Result<(), CameraDbError> {
        for cam in &self.cameras {
            let invalid = |message: String| CameraDbError::InvalidEntry {
                make: cam.make.clone(),
                model: cam.model.clone(),
                message,
            };
            cam.cfa_pattern().map_err(invalid)?;
            if let Some(sensor) = cam.sensors.iter().find(|s| s.white <= s.black) {
                return Err(invalid(format!(
                    "white level {} not above black level {}",
                    sensor.white, sensor.black
                )));
            }
        }
        for naked in &self.naked {
            if naked.bit_order().is_none() {
                return Err(CameraDbError::InvalidEntry {
                    make: naked.make.clone(),
                    model: naked.model.clone(),
                    message: format!("unknown bit order '{}'", naked.order),
                });
            }
        }
        Ok(())
    }

    /// Look up a camera mode. Make and model are compared after trimming.
    pub fn find(&self, make: &str, model: &str, mode: &str) -> Option<&Camera> {
        let (make, model) = (make.trim(), model.trim());
        self.cameras.iter().find(|c| c.matches(make, model, mode))
    }

    /// Whether any mode of this make/model is listed.
    pub fn has_camera(&self, make: &str, model: &str) -> bool {
        let (make, model) = (make.trim(), model.trim());
        self.cameras
            .iter()
            .any(|c| c.make.trim() == make && c.model.trim() == model)
    }

    /// The headerless camera whose files are exactly `file_size` bytes.
    pub fn find_naked(&self, file_size: u64) -> Option<&NakedCamera> {
        self.naked.iter().find(|n| n.file_size == file_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "cameras": [
            {
                "make": "NIKON CORPORATION",
                "model": "NIKON D3",
                "canonical_make": "Nikon",
                "aliases": ["NIKON D3X"],
                "crop": { "x": 2, "y": 0, "width": -4, "height": 0 },
                "sensors": [
                    { "black": 0, "white": 4095 },
                    { "black": 100, "white": 3900, "min_iso": 3200, "max_iso": 6400 }
                ],
                "cfa": ["RED", "GREEN", "GREEN", "BLUE"],
                "hints": { "force_uncompressed": "true" }
            },
            {
                "make": "NIKON CORPORATION",
                "model": "NIKON D3",
                "mode": "12bit-compressed",
                "supported": false
            }
        ],
        "naked": [
            { "make": "Canon", "model": "PowerShot Pro70", "file_size": 1397760,
              "width": 1552, "height": 1200, "bits": 10, "order": "msb" }
        ]
    }"#;

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_sample() {
        let db = CameraDb::from_json(SAMPLE).unwrap();
        assert_eq!(db.cameras.len(), 2);
        let cam = &db.cameras[0];
        assert!(cam.supported);
        assert_eq!(cam.decoder_version, 0);
        assert_eq!(cam.hint("force_uncompressed"), Some("true"));
        assert!(!db.cameras[1].supported);
    }

    #[test]
    fn test_empty_database() {
        let db = CameraDb::from_json("{}").unwrap();
        assert_eq!(db, CameraDb::empty());
        assert!(db.find("SONY", "DSLR-A100", "").is_none());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            CameraDb::from_json("{ cameras: 1 }"),
            Err(CameraDbError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_cfa_rejected() {
        let json = r#"{ "cameras": [ { "make": "A", "model": "B", "cfa": ["RED", "PURPLE"] } ] }"#;
        assert!(matches!(
            CameraDb::from_json(json),
            Err(CameraDbError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_unknown_naked_order_rejected() {
        let json = r#"{ "naked": [ { "make": "A", "model": "B", "file_size": 10,
            "width": 2, "height": 2, "bits": 8, "order": "zigzag" } ] }"#;
        assert!(CameraDb::from_json(json).is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = CameraDb::load("/nonexistent/cameras.json");
        assert!(matches!(result, Err(CameraDbError::Read { .. })));
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    #[test]
    fn test_find_by_mode_and_alias() {
        let db = CameraDb::from_json(SAMPLE).unwrap();
        assert!(db.find("NIKON CORPORATION ", " NIKON D3", "").is_some());
        assert!(db.find("NIKON CORPORATION", "NIKON D3X", "").is_some());
        let mode = db.find("NIKON CORPORATION", "NIKON D3", "12bit-compressed");
        assert!(mode.is_some_and(|c| !c.supported));
        assert!(db.find("NIKON CORPORATION", "NIKON D3", "14bit-compressed").is_none());
        assert!(db.has_camera("NIKON CORPORATION", "NIKON D3"));
    }

    #[test]
    fn test_sensor_for_iso() {
        let db = CameraDb::from_json(SAMPLE).unwrap();
        let cam = &db.cameras[0];
        assert_eq!(cam.sensor_for_iso(100).map(|s| s.black), Some(0));
        assert_eq!(cam.sensor_for_iso(3200).map(|s| s.black), Some(100));
        assert_eq!(cam.sensor_for_iso(12800).map(|s| s.white), Some(4095));
        assert!(db.cameras[1].sensor_for_iso(100).is_none());
    }

    #[test]
    fn test_crop_relative_edges() {
        let crop = CropSpec {
            x: 2,
            y: 1,
            width: -4,
            height: 0,
        };
        assert_eq!(crop.resolve(100, 50), Rect::new(2, 1, 94, 49));
        let fixed = CropSpec {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        assert_eq!(fixed.resolve(100, 50), Rect::new(0, 0, 10, 10));
    }

    #[test]
    fn test_cfa_pattern() {
        let db = CameraDb::from_json(SAMPLE).unwrap();
        let cfa = db.cameras[0].cfa_pattern().unwrap().unwrap();
        assert_eq!(cfa.color_at(0, 0), CfaColor::Red);
        assert_eq!(cfa.color_at(1, 1), CfaColor::Blue);
        assert!(db.cameras[1].cfa_pattern().unwrap().is_none());
    }

    #[test]
    fn test_naked_lookup() {
        let db = CameraDb::from_json(SAMPLE).unwrap();
        let naked = db.find_naked(1_397_760).unwrap();
        assert_eq!(naked.bit_order(), Some(BitOrder::Msb));
        assert!(db.find_naked(12).is_none());
    }
}
