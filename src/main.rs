//! rawdecode - decode camera RAW files to sensor data.
//!
//! This binary wraps the library for inspection from the command line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;

use bytes::Bytes;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rawdecode::{
    config::{load_cameras, Cli, Command, DecodeConfig, DumpConfig, IdentifyConfig, OutputFormat},
    decode_bytes, decoder_for,
    format::tiff::{tag_name, Compression, Entry, Ifd},
    format::x3f::X3fFile,
    parse_container, ContainerKind, RawImage, SampleType, TiffTag,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.command.verbose());

    match cli.command {
        Command::Decode(config) => run_decode(config),
        Command::Identify(config) => run_identify(config),
        Command::Dump(config) => run_dump(config),
    }
}

/// Initialize the logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "rawdecode=debug"
    } else {
        "rawdecode=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn read_file(path: &Path) -> Option<Bytes> {
    match std::fs::read(path) {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

/// Print `value` as pretty JSON, returning whether it succeeded.
fn print_json<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            true
        }
        Err(e) => {
            error!("Failed to serialize report: {}", e);
            false
        }
    }
}

// =============================================================================
// Decode Command
// =============================================================================

/// Summary of a decoded image.
#[derive(Debug, Serialize)]
struct DecodeReport {
    make: String,
    model: String,
    canonical_make: String,
    canonical_model: String,
    mode: String,
    iso: u32,
    width: usize,
    height: usize,
    cropped_width: usize,
    cropped_height: usize,
    crop_x: i64,
    crop_y: i64,
    components: usize,
    float: bool,
    cfa: Option<String>,
    filters: u32,
    black_level: i32,
    black_level_separate: [i32; 4],
    white_point: u32,
    wb_coeffs: Option<[f32; 3]>,
    pixel_aspect_ratio: f64,
    errors: Vec<String>,
}

impl DecodeReport {
    fn new(image: &RawImage) -> Self {
        let meta = &image.metadata;
        let crop = image.crop();
        Self {
            make: meta.make.clone(),
            model: meta.model.clone(),
            canonical_make: meta.canonical_make.clone(),
            canonical_model: meta.canonical_model.clone(),
            mode: meta.mode.clone(),
            iso: meta.iso,
            width: image.width(),
            height: image.height(),
            cropped_width: image.cropped_width(),
            cropped_height: image.cropped_height(),
            crop_x: crop.x,
            crop_y: crop.y,
            components: image.cpp(),
            float: image.sample_type() == SampleType::F32,
            cfa: image.is_cfa.then(|| image.cfa.describe()),
            filters: image.filters(),
            black_level: image.black_level,
            black_level_separate: image.black_level_separate,
            white_point: image.white_point,
            wb_coeffs: meta.wb_coeffs,
            pixel_aspect_ratio: meta.pixel_aspect_ratio,
            errors: image.errors().to_vec(),
        }
    }

    fn print_text(&self) {
        println!("Camera:      {} {}", self.make, self.model);
        if !self.canonical_make.is_empty() {
            println!("Canonical:   {} {}", self.canonical_make, self.canonical_model);
        }
        if !self.mode.is_empty() {
            println!("Mode:        {}", self.mode);
        }
        println!("ISO:         {}", self.iso);
        println!(
            "Size:        {}x{} (cropped {}x{} at {},{})",
            self.width,
            self.height,
            self.cropped_width,
            self.cropped_height,
            self.crop_x,
            self.crop_y
        );
        println!(
            "Samples:     {} per pixel, {}",
            self.components,
            if self.float { "float" } else { "16-bit" }
        );
        if let Some(ref cfa) = self.cfa {
            println!("CFA:         {} (filters 0x{:08X})", cfa, self.filters);
        }
        println!(
            "Levels:      black {} {:?}, white {}",
            self.black_level, self.black_level_separate, self.white_point
        );
        if let Some(wb) = self.wb_coeffs {
            println!("WB:          {} {} {}", wb[0], wb[1], wb[2]);
        }
        if self.pixel_aspect_ratio != 1.0 {
            println!("Pixel ratio: {}", self.pixel_aspect_ratio);
        }
    }
}

fn run_decode(config: DecodeConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let options = match config.decode_options() {
        Ok(options) => options,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let Some(file) = read_file(&config.file) else {
        return ExitCode::FAILURE;
    };

    let image = match decode_bytes(file, &options) {
        Ok(image) => image,
        Err(e) => {
            error!("Failed to decode {}: {}", config.file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    for message in image.errors() {
        warn!("{}", message);
    }

    if let Some(ref output) = config.output {
        if let Err(e) = write_pgm(&image, output) {
            error!("Failed to write {}: {}", output.display(), e);
            return ExitCode::FAILURE;
        }
        info!("Wrote {}", output.display());
    }

    let report = DecodeReport::new(&image);
    match config.format {
        OutputFormat::Json if !print_json(&report) => ExitCode::FAILURE,
        OutputFormat::Json => ExitCode::SUCCESS,
        OutputFormat::Text => {
            report.print_text();
            ExitCode::SUCCESS
        }
    }
}

/// Write the cropped first component as a 16-bit binary PGM.
fn write_pgm(image: &RawImage, path: &Path) -> std::io::Result<()> {
    let (width, height) = (image.cropped_width(), image.cropped_height());
    let scale = match image.sample_type() {
        SampleType::F32 => 65535.0,
        SampleType::U16 => 1.0,
    };
    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P5\n{width} {height}\n65535\n")?;
    for y in 0..height {
        for x in 0..width {
            let value = image.cropped_value(x, y, 0).unwrap_or(0.0) * scale;
            let value = value.round().clamp(0.0, 65535.0) as u16;
            out.write_all(&value.to_be_bytes())?;
        }
    }
    out.flush()
}

// =============================================================================
// Identify Command
// =============================================================================

#[derive(Debug, Serialize)]
struct IdentifyReport {
    container: &'static str,
    decoder: Option<&'static str>,
    make: Option<String>,
    model: Option<String>,
    directories: usize,
}

fn run_identify(config: IdentifyConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let cameras = match load_cameras(config.camera_db.as_ref()) {
        Ok(cameras) => cameras,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let Some(file) = read_file(&config.file) else {
        return ExitCode::FAILURE;
    };

    let (container, root) = match parse_container(file.clone(), &cameras) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("{}: {}", config.file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let decoder = decoder_for(container, &root).ok();

    let (make, model) = match container {
        ContainerKind::Naked => match cameras.find_naked(file.len() as u64) {
            Some(camera) => (Some(camera.make.clone()), Some(camera.model.clone())),
            None => (None, None),
        },
        ContainerKind::X3f => match X3fFile::parse(&file).ok().and_then(|x3f| x3f.make_model()) {
            Some((make, model)) => (Some(make), Some(model)),
            None => (
                string_tag(&root.all_ifds(), TiffTag::Make),
                string_tag(&root.all_ifds(), TiffTag::Model),
            ),
        },
        _ => (
            string_tag(&root.all_ifds(), TiffTag::Make),
            string_tag(&root.all_ifds(), TiffTag::Model),
        ),
    };

    let report = IdentifyReport {
        container: container.name(),
        decoder: decoder.map(|kind| kind.name()),
        make,
        model,
        directories: root.all_ifds().len(),
    };
    match config.format {
        OutputFormat::Json => {
            if !print_json(&report) {
                return ExitCode::FAILURE;
            }
        }
        OutputFormat::Text => {
            println!("Container:   {}", report.container);
            println!("Decoder:     {}", report.decoder.unwrap_or("none"));
            println!("Make:        {}", report.make.as_deref().unwrap_or("-"));
            println!("Model:       {}", report.model.as_deref().unwrap_or("-"));
            println!("Directories: {}", report.directories);
        }
    }
    if report.decoder.is_some() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn string_tag(ifds: &[&Ifd], tag: TiffTag) -> Option<String> {
    ifds.iter()
        .find_map(|ifd| ifd.get_entry(tag))
        .map(|e| e.get_string().trim().to_string())
}

// =============================================================================
// Dump Command
// =============================================================================

/// Value preview, with compression codes named.
fn describe_value(entry: &Entry, max_values: usize) -> String {
    if entry.tag() == u16::from(TiffTag::Compression) {
        if let Ok(code) = entry.get_u32(0) {
            return format!("{code} ({:?})", Compression::from_u32(code));
        }
    }
    entry.preview(max_values)
}

fn run_dump(config: DumpConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let Some(file) = read_file(&config.file) else {
        return ExitCode::FAILURE;
    };
    let cameras = rawdecode::CameraDb::empty();
    let (container, root) = match parse_container(file, &cameras) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("{}: {}", config.file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    println!("{} ({:?})", container.name(), root.byte_order());
    for (i, ifd) in root.ifds.iter().enumerate() {
        println!("IFD {} @ {}", i, ifd.offset());
        dump_ifd(ifd, 1, config.max_values);
    }
    ExitCode::SUCCESS
}

fn dump_ifd(ifd: &Ifd, depth: usize, max_values: usize) {
    let indent = "  ".repeat(depth);
    for entry in ifd.entries() {
        println!(
            "{indent}{:<28} {:?}[{}] {}",
            tag_name(entry.tag()),
            entry.field_type(),
            entry.count(),
            describe_value(entry, max_values)
        );
    }
    for sub in ifd.sub_ifds() {
        let parent = sub.parent_tag().map(tag_name).unwrap_or_default();
        println!("{indent}{} @ {} ({:?})", parent, sub.offset(), sub.byte_order());
        dump_ifd(sub, depth + 1, max_values);
    }
}
