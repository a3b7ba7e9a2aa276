use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::blob::ImageBlob;

/// Inputs of a multi-image upload paired with the sparse outputs of the most
/// recent run. A `None` slot means the item failed or was never processed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchJob {
    inputs: Vec<ImageBlob>,
    outputs: Vec<Option<ImageBlob>>,
    runs: usize,
}

impl BatchJob {
    pub fn new(inputs: Vec<ImageBlob>) -> Self {
        let outputs = vec![None; inputs.len()];
        Self {
            inputs,
            outputs,
            runs: 0,
        }
    }

    pub fn inputs(&self) -> &[ImageBlob] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Option<ImageBlob>] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Replaces the whole output set with the result of a new run.
    pub fn replace_outputs(&mut self, outputs: Vec<Option<ImageBlob>>) -> Result<()> {
        if outputs.len() != self.inputs.len() {
            bail!(
                "batch output has {} slots for {} inputs",
                outputs.len(),
                self.inputs.len()
            );
        }
        self.outputs = outputs;
        self.runs += 1;
        Ok(())
    }

    pub fn succeeded(&self) -> usize {
        self.outputs.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        if self.runs == 0 {
            return Vec::new();
        }
        self.outputs
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Produced images with their input index, in input order.
    pub fn downloadable(&self) -> Vec<(usize, &ImageBlob)> {
        self.outputs
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|image| (idx, image)))
            .collect()
    }
}

/// Shared settle counter for a running batch. Clones observe the same
/// counter, so a UI thread can poll while workers report.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    inner: Arc<ProgressInner>,
}

#[derive(Debug)]
struct ProgressInner {
    total: usize,
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            inner: Arc::new(ProgressInner {
                total,
                processed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn total(&self) -> usize {
        self.inner.total
    }

    pub fn processed(&self) -> usize {
        self.inner.processed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.inner.failed.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.processed() >= self.total()
    }

    /// Records one settled item and returns the processed count after it.
    pub fn record(&self, success: bool) -> usize {
        if !success {
            self.inner.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.processed.fetch_add(1, Ordering::SeqCst) + 1
    }
}

pub fn failure_summary(failed: usize, total: usize) -> Option<String> {
    if failed == 0 {
        return None;
    }
    Some(format!(
        "{failed} out of {total} images could not be processed."
    ))
}
