//! `xcom-bridge estimate`: transfer-time table for a file.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use xcom_protocol::TransferEstimate;
use xcom_transfer::{STANDARD_BAUD_RATES, estimate_transfer};

use crate::config::BridgeConfig;

pub fn run(file: &Path, config: &BridgeConfig) -> anyhow::Result<()> {
    let size = std::fs::metadata(file)
        .with_context(|| format!("reading {}", file.display()))?
        .len();
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let pacing = config.pacing();
    let rows = STANDARD_BAUD_RATES
        .iter()
        .map(|&baud| {
            estimate_transfer(
                size,
                name.len(),
                baud,
                pacing.settle_interval,
                pacing.inter_chunk_interval,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    print!("{}", render_table(&name, &rows, config.baud));
    Ok(())
}

/// Formats one row per baud rate; the configured rate is starred.
fn render_table(name: &str, rows: &[TransferEstimate], configured_baud: u32) -> String {
    let mut out = String::new();
    let Some(first) = rows.first() else {
        return out;
    };

    let _ = writeln!(
        out,
        "{name}: {} bytes, {} chunks, {} bytes framing ({:.1}% efficiency)",
        first.file_size, first.chunks, first.overhead_bytes, first.efficiency
    );
    let _ = writeln!(out, "  {:>8}  {:>10}  {:>10}  {:>10}", "baud", "line", "device", "total");
    for row in rows {
        let mark = if row.baud == configured_baud { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{mark} {:>8}  {:>9.2}s  {:>9.2}s  {:>9.2}s",
            row.baud, row.raw_transfer_secs, row.processing_secs, row.total_secs
        );
    }
    out
}
