//! The recognition loop: frames in, overlays and attendance out.

use crate::replay::{ReplayExtractor, ReplayFrame};
use rollcall_core::{
    AttendanceStore, DisplaySink, FaceOverlay, FpsCounter, Identity, PipelineError,
    RecognitionSession,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Totals reported when the loop ends.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: usize,
    pub processed: usize,
    pub admitted: Vec<Identity>,
    pub persistence_failures: usize,
    /// Identities in the seen set when the loop ended, seeded ones included.
    pub present: usize,
}

/// Prints overlays to stdout whenever the set of labels changes.
#[derive(Default)]
pub struct TerminalSink {
    last: Vec<String>,
}

impl DisplaySink for TerminalSink {
    fn render(&mut self, overlays: &[FaceOverlay], fps: f64) {
        let labels: Vec<String> = overlays.iter().map(|o| o.label.clone()).collect();
        if labels != self.last {
            if labels.is_empty() {
                println!("[FPS: {fps:.2}] no faces");
            } else {
                let faces: Vec<String> = overlays
                    .iter()
                    .map(|o| {
                        format!(
                            "{} @ ({:.0},{:.0} {:.0}x{:.0})",
                            o.label, o.bbox.x, o.bbox.y, o.bbox.width, o.bbox.height
                        )
                    })
                    .collect();
                println!("[FPS: {fps:.2}] {}", faces.join(", "));
            }
            self.last = labels;
        }
        tracing::trace!(fps, faces = overlays.len(), "frame rendered");
    }
}

/// Drive `session` over `frames` until the stream ends or `stop` is set.
///
/// A frame in progress always completes before the stop flag is honoured.
/// Only a fatal pipeline error (dimension mismatch) ends the loop early.
pub fn run_loop<I, S, D>(
    session: &mut RecognitionSession,
    store: &S,
    frames: I,
    sink: &mut D,
    stop: &AtomicBool,
    frame_interval: Duration,
) -> Result<RunSummary, PipelineError>
where
    I: IntoIterator<Item = std::io::Result<ReplayFrame>>,
    S: AttendanceStore,
    D: DisplaySink,
{
    let mut extractor = ReplayExtractor;
    let mut fps = FpsCounter::new(Instant::now());
    let mut summary = RunSummary::default();

    for frame in frames {
        if stop.load(Ordering::Relaxed) {
            tracing::info!("stop requested");
            break;
        }

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame source read failed; ending stream");
                break;
            }
        };

        let report = session.process_frame(&mut extractor, store, &frame)?;
        summary.frames += 1;
        if report.processed {
            summary.processed += 1;
        }
        for event in &report.events {
            println!(
                "Attendance updated for USN {} at {}",
                event.identity,
                event.at.format("%H:%M:%S")
            );
            summary.admitted.push(event.identity);
        }
        summary.persistence_failures += report.failures.len();

        sink.render(&report.overlays, fps.tick(Instant::now()));

        if !frame_interval.is_zero() {
            std::thread::sleep(frame_interval);
        }
    }

    summary.present = session.admission().seen_count();
    tracing::info!(
        frames = summary.frames,
        processed = summary.processed,
        admitted = summary.admitted.len(),
        present = summary.present,
        "recognition loop finished"
    );
    Ok(summary)
}
