//! Row-band parallel decoding.
//!
//! A decode job is split into disjoint bands of rows. Each band is handed
//! to the worker closure as its own [`PlaneMut`], so workers never share
//! mutable state and the result does not depend on scheduling. Errors are
//! returned per band and aggregated after the join.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::image::{PlaneMut, RawImage};

/// Worker count for a `threads` setting, where 0 means one per core.
pub fn effective_threads(threads: usize) -> usize {
    if threads > 0 {
        return threads;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Decode the image in `threads` bands of roughly equal height.
pub fn decode_bands<F>(image: &mut RawImage, threads: usize, decode: F) -> Result<(), DecodeError>
where
    F: Fn(&mut PlaneMut<'_>) -> Result<(), DecodeError> + Sync,
{
    let workers = effective_threads(threads).min(image.height()).max(1);
    let rows = image.height().div_ceil(workers);
    decode_bands_of(image, threads, rows, decode)
}

/// Decode the image in bands of `rows` rows each.
///
/// A band failing with a recoverable error is recorded on the image. The
/// call fails if any band hits a non-recoverable error or if every band
/// failed.
pub fn decode_bands_of<F>(
    image: &mut RawImage,
    threads: usize,
    rows: usize,
    decode: F,
) -> Result<(), DecodeError>
where
    F: Fn(&mut PlaneMut<'_>) -> Result<(), DecodeError> + Sync,
{
    let rows = rows.max(1);
    let workers = effective_threads(threads);
    let (pitch, width, cpp) = (image.pitch(), image.width(), image.cpp());
    let run = |chunk: (usize, &mut [u16])| {
        let (i, data) = chunk;
        let mut plane = PlaneMut::new(data, pitch, width, cpp, i * rows);
        decode(&mut plane)
    };

    let results: Vec<Result<(), DecodeError>> = {
        let pixels = image.pixels_u16_mut()?;
        let bands = pixels.len().div_ceil(pitch * rows);
        debug!(bands, rows, workers, "decoding row bands");

        if workers <= 1 || bands <= 1 {
            pixels.chunks_mut(pitch * rows).enumerate().map(run).collect()
        } else {
            match ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| {
                    pixels
                        .par_chunks_mut(pitch * rows)
                        .enumerate()
                        .map(run)
                        .collect()
                }),
                Err(err) => {
                    warn!(%err, "could not start worker pool, decoding on one thread");
                    pixels.chunks_mut(pitch * rows).enumerate().map(run).collect()
                }
            }
        }
    };

    collect_band_errors(image, results)
}

/// Run `count` independent tasks on up to `threads` workers.
///
/// Results come back in task order whatever the scheduling.
pub fn run_tasks<T, F>(threads: usize, count: usize, task: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let workers = effective_threads(threads).min(count);
    if workers <= 1 {
        return (0..count).map(&task).collect();
    }
    debug!(count, workers, "running tasks");
    match ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| (0..count).into_par_iter().map(&task).collect()),
        Err(err) => {
            warn!(%err, "could not start worker pool, running tasks on one thread");
            (0..count).map(&task).collect()
        }
    }
}

/// Apply the band failure policy to per-band results.
pub(crate) fn collect_band_errors(
    image: &mut RawImage,
    results: Vec<Result<(), DecodeError>>,
) -> Result<(), DecodeError> {
    let total = results.len();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(()) => {}
            Err(err) if !err.is_recoverable() => return Err(err),
            Err(err) => failures.push(err),
        }
    }
    if total > 0 && failures.len() >= total {
        // every band failed, there is nothing usable
        return Err(failures.swap_remove(0));
    }
    for err in failures {
        image.add_error(err.to_string());
    }
    Ok(())
}
