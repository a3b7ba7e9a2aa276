//! Fan-out/fan-in over a set of independent images.
//!
//! Every item is submitted at once (or through a fixed pool when
//! `max_concurrency` is set). Workers send settlements over a channel to a
//! single collector on the calling thread, which owns the output vector and
//! the progress accumulator. Completion order is therefore free, while the
//! output stays aligned with the input order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, Result};
use retouch_contracts::batch::{failure_summary, BatchProgress};
use retouch_contracts::blob::ImageBlob;
use serde_json::Value;

use crate::error_chain_text;
use crate::gateway::FailedExchange;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Upper bound on simultaneous invocations. `None` or `Some(0)` submits
    /// every item at once.
    pub max_concurrency: Option<usize>,
    /// Shared counter to observe from another thread. A fresh one is used
    /// when absent.
    pub progress: Option<BatchProgress>,
}

/// One settled item, handed to the progress callback in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettlement {
    pub index: usize,
    pub processed: usize,
    pub total: usize,
    pub error: Option<String>,
    /// Provider envelope behind a failed item, when there was one.
    pub response: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outputs: Vec<Option<ImageBlob>>,
    pub failures: Vec<BatchFailure>,
    pub summary: Option<String>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outputs.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Applies `transform` to every image with the same instruction and waits
/// for all of them. A failing item never cancels its siblings; it leaves a
/// `None` in its slot and a [`BatchFailure`] with the error text. A panic in
/// `transform` counts as that item failing.
pub fn run_batch<F, P>(
    images: &[ImageBlob],
    instruction: &str,
    transform: F,
    options: &BatchOptions,
    mut on_progress: P,
) -> BatchReport
where
    F: Fn(&ImageBlob, &str) -> Result<ImageBlob> + Sync,
    P: FnMut(&BatchSettlement),
{
    let total = images.len();
    if total == 0 {
        return BatchReport::default();
    }
    let progress = options
        .progress
        .clone()
        .unwrap_or_else(|| BatchProgress::new(total));
    let workers = options
        .max_concurrency
        .filter(|limit| *limit > 0)
        .unwrap_or(total)
        .min(total);

    let mut outputs: Vec<Option<ImageBlob>> = vec![None; total];
    let mut failures = Vec::new();
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, Result<ImageBlob>)>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let transform = &transform;
            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(image) = images.get(index) else {
                    break;
                };
                let result = panic::catch_unwind(AssertUnwindSafe(|| transform(image, instruction)))
                    .unwrap_or_else(|payload| {
                        Err(anyhow!("processing panicked: {}", panic_text(&*payload)))
                    });
                if tx.send((index, result)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        for (index, result) in rx {
            let (error, response) = match result {
                Ok(image) => {
                    outputs[index] = Some(image);
                    (None, None)
                }
                Err(err) => (
                    Some(error_chain_text(&err, 512)),
                    err.downcast_ref::<FailedExchange>()
                        .and_then(|failed| failed.response.clone()),
                ),
            };
            let processed = progress.record(error.is_none());
            if let Some(message) = error.as_ref() {
                failures.push(BatchFailure {
                    index,
                    message: message.clone(),
                });
            }
            on_progress(&BatchSettlement {
                index,
                processed,
                total,
                error,
                response,
            });
        }
    });

    failures.sort_by_key(|failure| failure.index);
    let summary = failure_summary(failures.len(), total);
    BatchReport {
        outputs,
        failures,
        summary,
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    use anyhow::bail;

    use super::*;

    fn blob(name: &str, tag: u8) -> ImageBlob {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.push(tag);
        ImageBlob::new(bytes, "image/png", name).unwrap()
    }

    fn inputs(count: u8) -> Vec<ImageBlob> {
        (0..count)
            .map(|tag| blob(&format!("img-{tag}.png"), tag))
            .collect()
    }

    /// Marks the output with the input name and the instruction.
    fn transformed(image: &ImageBlob, instruction: &str) -> ImageBlob {
        image.with_name(format!("{instruction}-{}", image.name()))
    }

    #[test]
    fn output_is_aligned_with_input_whatever_the_completion_order() {
        let images = inputs(5);
        let fails = [false, true, false, true, false];
        // Later indices finish first.
        let report = run_batch(
            &images,
            "sepia",
            |image, instruction| {
                let index = images.iter().position(|row| row == image).unwrap_or(0);
                std::thread::sleep(Duration::from_millis((5 - index as u64) * 15));
                if fails[index] {
                    bail!("simulated failure for {}", image.name());
                }
                Ok(transformed(image, instruction))
            },
            &BatchOptions::default(),
            |_| {},
        );

        assert_eq!(report.outputs.len(), 5);
        for (index, slot) in report.outputs.iter().enumerate() {
            assert_eq!(slot.is_some(), !fails[index], "slot {index}");
        }
        assert_eq!(
            report.outputs[2].as_ref().map(ImageBlob::name),
            Some("sepia-img-2.png")
        );
        let failed: Vec<usize> = report.failures.iter().map(|row| row.index).collect();
        assert_eq!(failed, vec![1, 3]);
        assert!(report.failures[0].message.contains("simulated failure"));
        assert_eq!(
            report.summary.as_deref(),
            Some("2 out of 5 images could not be processed.")
        );
    }

    #[test]
    fn progress_accumulates_in_arrival_order() {
        let images = inputs(4);
        let progress = BatchProgress::new(images.len());
        let options = BatchOptions {
            max_concurrency: None,
            progress: Some(progress.clone()),
        };
        let mut seen = Vec::new();
        let report = run_batch(
            &images,
            "noir",
            |image, instruction| {
                if image.name() == "img-0.png" {
                    std::thread::sleep(Duration::from_millis(60));
                }
                Ok(transformed(image, instruction))
            },
            &options,
            |settlement| seen.push((settlement.index, settlement.processed)),
        );

        let counts: Vec<usize> = seen.iter().map(|(_, processed)| *processed).collect();
        assert_eq!(counts, vec![1, 2, 3, 4]);
        assert_eq!(seen.last().map(|(index, _)| *index), Some(0));
        assert!(progress.is_finished());
        assert_eq!(progress.failed(), 0);
        assert!(report.summary.is_none());
    }

    #[test]
    fn unbounded_fan_out_runs_every_item_at_once() {
        let images = inputs(4);
        let barrier = Barrier::new(images.len());
        // Deadlocks unless all four invocations are live together.
        let report = run_batch(
            &images,
            "sepia",
            |image, instruction| {
                barrier.wait();
                Ok(transformed(image, instruction))
            },
            &BatchOptions::default(),
            |_| {},
        );
        assert_eq!(report.succeeded(), 4);
    }

    #[test]
    fn max_concurrency_bounds_simultaneous_invocations() {
        let images = inputs(6);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let options = BatchOptions {
            max_concurrency: Some(2),
            progress: None,
        };
        let report = run_batch(
            &images,
            "sepia",
            |image, instruction| {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(transformed(image, instruction))
            },
            &options,
            |_| {},
        );
        assert_eq!(report.succeeded(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn panicking_item_fails_alone() {
        let images = inputs(3);
        let report = run_batch(
            &images,
            "sepia",
            |image, instruction| {
                if image.name() == "img-1.png" {
                    panic!("decoder blew up");
                }
                Ok(transformed(image, instruction))
            },
            &BatchOptions::default(),
            |_| {},
        );
        let present: Vec<bool> = report.outputs.iter().map(Option::is_some).collect();
        assert_eq!(present, vec![true, false, true]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].message.contains("decoder blew up"));
        assert_eq!(
            report.summary.as_deref(),
            Some("1 out of 3 images could not be processed.")
        );
    }

    #[test]
    fn empty_input_settles_immediately() {
        let report = run_batch(
            &[],
            "sepia",
            |image, _| Ok(image.clone()),
            &BatchOptions::default(),
            |_| panic!("no settlements expected"),
        );
        assert!(report.outputs.is_empty());
        assert!(report.summary.is_none());
    }
}
