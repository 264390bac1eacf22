//! Compressed binary cache of an ingested trace.
//!
//! Re-parsing large monitor captures is the slow part of a run, so the
//! ingested [`NetworkTrace`] can be stored as zstd-compressed bincode and
//! loaded back on the next run.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use color_eyre::eyre::{Context, Result};

use super::types::NetworkTrace;

const COMPRESSION_LEVEL: i32 = 3;

/// Write a trace to `path`
pub fn save_trace(trace: &NetworkTrace, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create trace cache: {}", path.display()))?;
    let mut encoder = zstd::Encoder::new(BufWriter::new(file), COMPRESSION_LEVEL)
        .context("Failed to start zstd encoder")?;

    bincode::serialize_into(&mut encoder, trace).context("Failed to encode trace")?;
    let mut writer = encoder.finish().context("Failed to finish zstd stream")?;
    writer.flush().context("Failed to flush trace cache")?;

    log::info!("Trace cache written to {}", path.display());
    Ok(())
}

/// Read a trace written by [`save_trace`]
pub fn load_trace(path: &Path) -> Result<NetworkTrace> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open trace cache: {}", path.display()))?;
    let decoder = zstd::Decoder::new(BufReader::new(file)).context("Failed to start zstd decoder")?;

    let trace: NetworkTrace = bincode::deserialize_from(decoder)
        .with_context(|| format!("Failed to decode trace cache: {}", path.display()))?;

    log::info!(
        "Loaded {} nodes from trace cache {}",
        trace.node_count(),
        path.display()
    );
    Ok(trace)
}
