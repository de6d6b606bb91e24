// This file is an example of how to use the `pixel_parity` library.
// It synthesises a baseline and two "captured" frames in memory, compares them
// through the async pool, and logs the reports. Set RUST_LOG=debug for traversal
// details, or PIXEL_PARITY_WORKERS to pin the worker ceiling.

use image::{Rgba, RgbaImage};
use pixel_parity::ProcessorConfig;
use pixel_parity::parallel_pipeline::{ComparisonJob, ComparisonPool, PoolConfig, SharedBuffer};
use pixel_parity::pipeline::ComparisonConfig;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 1080;
const HEIGHT: u32 = 2220;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).compact().init();

    info!("Pixel Parity - Example Runner");

    let comparison = ComparisonConfig {
        processor: ProcessorConfig::from_env(),
        ..ComparisonConfig::default()
    }
    .with_color_threshold(2.0)
    .with_mismatch_tolerance(0.001);
    let pool = ComparisonPool::new(PoolConfig::default().with_comparison(comparison))?;

    let baseline: SharedBuffer = Arc::new(render_screen(None));
    let jobs = vec![
        ComparisonJob::from_shared("unchanged", baseline.clone(), Arc::new(render_screen(None))),
        ComparisonJob::from_shared("shifted-button", baseline, Arc::new(render_screen(Some(12)))),
    ];

    for result in pool.submit_all(jobs).await {
        match result {
            Ok(outcome) => {
                let report = &outcome.report;
                info!(
                    job = %outcome.name,
                    matches = report.matches,
                    mismatched = report.mismatched_pixels,
                    bounds = ?report.divergence_bounds(),
                    "report"
                );
            }
            Err(err) => warn!(error = %err, "comparison failed"),
        }
    }

    pool.shutdown().await?;
    Ok(())
}

/// A stand-in for a captured screen: a vertical gradient with a "button" block,
/// optionally nudged to the right by `button_offset` pixels.
fn render_screen(button_offset: Option<u32>) -> RgbaImage {
    let offset = button_offset.unwrap_or(0);
    RgbaImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let in_button = (200 + offset..600 + offset).contains(&x) && (1800..1950).contains(&y);
        if in_button {
            Rgba([30, 120, 220, 255])
        } else {
            let shade = (y * 255 / HEIGHT) as u8;
            Rgba([shade, shade, shade, 255])
        }
    })
}
