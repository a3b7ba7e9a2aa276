//! Editor state controller.
//!
//! All mutation of the editing session goes through [`EditorState`]'s
//! commands. Requests to the generation gateway are split in two: `begin_*`
//! validates and hands out a ticket stamped with the current epoch, and
//! `commit_*` applies the result only if that epoch is still current. Loading
//! a new image or starting over bumps the epoch, so a response that arrives
//! for a superseded context is dropped instead of being applied.

use std::fmt;

use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use crate::batch::{failure_summary, BatchJob};
use crate::blob::ImageBlob;
use crate::compare::CompareSlider;
use crate::errors::InputError;
use crate::history::{EditHistory, Version};
use crate::hotspot::{Dims, Hotspot, Point};
use crate::summary::SessionSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditOperation {
    Localized,
    Filter,
    Adjustment,
    Composite,
    ExtendBackdrop,
    ReplaceBackdrop,
    Enhance,
}

impl EditOperation {
    pub const ALL: [EditOperation; 7] = [
        EditOperation::Localized,
        EditOperation::Filter,
        EditOperation::Adjustment,
        EditOperation::Composite,
        EditOperation::ExtendBackdrop,
        EditOperation::ReplaceBackdrop,
        EditOperation::Enhance,
    ];

    /// Stable identifier used in events and version metadata.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Localized => "localized_edit",
            Self::Filter => "filter",
            Self::Adjustment => "adjustment",
            Self::Composite => "composite",
            Self::ExtendBackdrop => "extend_backdrop",
            Self::ReplaceBackdrop => "replace_backdrop",
            Self::Enhance => "enhance",
        }
    }

    /// Human wording used inside failure messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Localized => "edit",
            Self::Filter => "filter",
            Self::Adjustment => "adjustment",
            Self::Composite => "composite",
            Self::ExtendBackdrop => "backdrop extension",
            Self::ReplaceBackdrop => "backdrop replacement",
            Self::Enhance => "enhancement",
        }
    }
}

/// A user command that needs the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum EditRequest {
    Localized { prompt: String },
    Filter { prompt: String },
    Adjustment { prompt: String },
    ExtendBackdrop,
    ReplaceBackdrop { background: ImageBlob },
    Enhance,
    Composite {
        subject: ImageBlob,
        scene: ImageBlob,
        style: ImageBlob,
    },
}

/// A validated request with its inputs captured.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedEdit {
    Localized {
        image: ImageBlob,
        prompt: String,
        hotspot: Hotspot,
    },
    Filter {
        image: ImageBlob,
        prompt: String,
    },
    Adjustment {
        image: ImageBlob,
        prompt: String,
    },
    ExtendBackdrop {
        image: ImageBlob,
    },
    ReplaceBackdrop {
        image: ImageBlob,
        background: ImageBlob,
    },
    Enhance {
        image: ImageBlob,
    },
    Composite {
        subject: ImageBlob,
        scene: ImageBlob,
        style: ImageBlob,
    },
}

impl PreparedEdit {
    pub fn operation(&self) -> EditOperation {
        match self {
            Self::Localized { .. } => EditOperation::Localized,
            Self::Filter { .. } => EditOperation::Filter,
            Self::Adjustment { .. } => EditOperation::Adjustment,
            Self::ExtendBackdrop { .. } => EditOperation::ExtendBackdrop,
            Self::ReplaceBackdrop { .. } => EditOperation::ReplaceBackdrop,
            Self::Enhance { .. } => EditOperation::Enhance,
            Self::Composite { .. } => EditOperation::Composite,
        }
    }

    pub fn prompt(&self) -> Option<&str> {
        match self {
            Self::Localized { prompt, .. }
            | Self::Filter { prompt, .. }
            | Self::Adjustment { prompt, .. } => Some(prompt.as_str()),
            _ => None,
        }
    }

    pub fn inputs(&self) -> Vec<&ImageBlob> {
        match self {
            Self::Localized { image, .. }
            | Self::Filter { image, .. }
            | Self::Adjustment { image, .. }
            | Self::ExtendBackdrop { image }
            | Self::Enhance { image } => vec![image],
            Self::ReplaceBackdrop { image, background } => vec![image, background],
            Self::Composite {
                subject,
                scene,
                style,
            } => vec![subject, scene, style],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditTicket {
    epoch: u64,
    edit: PreparedEdit,
}

impl EditTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn edit(&self) -> &PreparedEdit {
        &self.edit
    }
}

/// Whole-image operations that can be fanned out over a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    Filter,
    Adjustment,
}

impl BatchOperation {
    pub fn operation(&self) -> EditOperation {
        match self {
            Self::Filter => EditOperation::Filter,
            Self::Adjustment => EditOperation::Adjustment,
        }
    }

    /// The single-image edit this batch applies to `image`.
    pub fn prepare(&self, image: ImageBlob, instruction: &str) -> PreparedEdit {
        let prompt = instruction.to_string();
        match self {
            Self::Filter => PreparedEdit::Filter { image, prompt },
            Self::Adjustment => PreparedEdit::Adjustment { image, prompt },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchTicket {
    epoch: u64,
    operation: BatchOperation,
    instruction: String,
    inputs: Vec<ImageBlob>,
}

impl BatchTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn operation(&self) -> BatchOperation {
        self.operation
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn inputs(&self) -> &[ImageBlob] {
        &self.inputs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    Failed,
    Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub edits_succeeded: u64,
    pub edits_failed: u64,
    pub batch_items: u64,
    pub batch_failed: u64,
}

#[derive(Debug)]
pub struct EditorState {
    session_id: String,
    history: EditHistory,
    hotspot: Option<Hotspot>,
    compare: CompareSlider,
    batch: Option<BatchJob>,
    busy: bool,
    epoch: u64,
    error: Option<String>,
    stats: SessionStats,
}

impl Default for EditorState {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorState {
    pub fn new() -> Self {
        Self::with_session_id(Uuid::new_v4().to_string())
    }

    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            history: EditHistory::new(),
            hotspot: None,
            compare: CompareSlider::new(),
            batch: None,
            busy: false,
            epoch: 0,
            error: None,
            stats: SessionStats::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn current_image(&self) -> Option<&ImageBlob> {
        self.history.current().map(Version::image)
    }

    pub fn original_image(&self) -> Option<&ImageBlob> {
        self.history.original().map(Version::image)
    }

    pub fn hotspot(&self) -> Option<&Hotspot> {
        self.hotspot.as_ref()
    }

    pub fn compare(&self) -> &CompareSlider {
        &self.compare
    }

    /// Pointer events for the slider. Activation goes through
    /// [`EditorState::set_compare_active`].
    pub fn compare_mut(&mut self) -> &mut CompareSlider {
        &mut self.compare
    }

    pub fn batch(&self) -> Option<&BatchJob> {
        self.batch.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Starts a new single-image lineage, superseding anything in flight.
    pub fn load_image(&mut self, image: ImageBlob) {
        self.new_context();
        self.history.seed(Version::new(image, "upload"));
    }

    pub fn load_batch(&mut self, images: Vec<ImageBlob>) -> Result<(), InputError> {
        if images.is_empty() {
            return Err(self.refuse(InputError::EmptyBatch));
        }
        self.new_context();
        self.batch = Some(BatchJob::new(images));
        Ok(())
    }

    pub fn start_over(&mut self) {
        self.new_context();
    }

    fn new_context(&mut self) {
        self.epoch += 1;
        self.history.clear();
        self.hotspot = None;
        self.compare.reset();
        self.batch = None;
        self.busy = false;
        self.error = None;
    }

    /// Records a click on the rendered image of `display_dims`.
    pub fn select_hotspot(&mut self, display: Point, display_dims: Dims) -> Result<Hotspot> {
        let Some(current) = self.current_image() else {
            return Err(self.refuse(InputError::NoImageLoaded).into());
        };
        let natural = current.dimensions()?;
        let hotspot = Hotspot::locate(display, display_dims, natural)
            .ok_or_else(|| anyhow!("hotspot cannot be mapped onto the image"))?;
        self.hotspot = Some(hotspot);
        Ok(hotspot)
    }

    pub fn set_hotspot(&mut self, hotspot: Option<Hotspot>) {
        self.hotspot = hotspot;
    }

    pub fn begin_edit(&mut self, request: EditRequest) -> Result<EditTicket, InputError> {
        if self.busy {
            return Err(self.refuse(InputError::RequestInFlight));
        }
        let edit = match request {
            EditRequest::Composite {
                subject,
                scene,
                style,
            } => PreparedEdit::Composite {
                subject,
                scene,
                style,
            },
            other => {
                let Some(image) = self.current_image().cloned() else {
                    return Err(self.refuse(InputError::NoImageLoaded));
                };
                match other {
                    EditRequest::Localized { prompt } => {
                        let prompt = self.required_prompt(&prompt)?;
                        let Some(hotspot) = self.hotspot else {
                            return Err(self.refuse(InputError::MissingHotspot));
                        };
                        PreparedEdit::Localized {
                            image,
                            prompt,
                            hotspot,
                        }
                    }
                    EditRequest::Filter { prompt } => PreparedEdit::Filter {
                        image,
                        prompt: self.required_prompt(&prompt)?,
                    },
                    EditRequest::Adjustment { prompt } => PreparedEdit::Adjustment {
                        image,
                        prompt: self.required_prompt(&prompt)?,
                    },
                    EditRequest::ExtendBackdrop => PreparedEdit::ExtendBackdrop { image },
                    EditRequest::ReplaceBackdrop { background } => {
                        PreparedEdit::ReplaceBackdrop { image, background }
                    }
                    EditRequest::Enhance => PreparedEdit::Enhance { image },
                    EditRequest::Composite { .. } => unreachable!("handled above"),
                }
            }
        };
        self.busy = true;
        self.error = None;
        Ok(EditTicket {
            epoch: self.epoch,
            edit,
        })
    }

    /// Applies a finished request. `result` carries the user-facing message
    /// on failure.
    pub fn commit_edit(
        &mut self,
        ticket: &EditTicket,
        result: Result<ImageBlob, String>,
    ) -> CommitOutcome {
        if ticket.epoch != self.epoch {
            return CommitOutcome::Stale;
        }
        self.busy = false;
        match result {
            Ok(image) => {
                let operation = ticket.edit.operation();
                let version = Version::new(image, operation.key());
                if operation == EditOperation::Composite {
                    self.history.seed(version);
                } else {
                    self.history.append(version);
                }
                self.hotspot = None;
                self.compare.reset();
                self.error = None;
                self.stats.edits_succeeded += 1;
                CommitOutcome::Applied
            }
            Err(message) => {
                self.error = Some(message);
                self.stats.edits_failed += 1;
                CommitOutcome::Failed
            }
        }
    }

    /// Drops an outstanding edit or batch ticket without a result. Only the
    /// busy flag is released; history, batch outputs and banner are left
    /// as they were. Tickets from an earlier epoch are ignored.
    pub fn abandon(&mut self, ticket_epoch: u64) {
        if ticket_epoch == self.epoch {
            self.busy = false;
        }
    }

    pub fn undo(&mut self) -> bool {
        if self.busy {
            return false;
        }
        let moved = self.history.undo();
        if moved {
            self.hotspot = None;
        }
        moved
    }

    pub fn redo(&mut self) -> bool {
        if self.busy {
            return false;
        }
        let moved = self.history.redo();
        if moved {
            self.hotspot = None;
        }
        moved
    }

    pub fn reset_to_origin(&mut self) -> bool {
        if self.busy {
            return false;
        }
        let moved = self.history.reset_to_origin();
        if moved {
            self.hotspot = None;
        }
        moved
    }

    pub fn set_compare_active(&mut self, active: bool) -> Result<(), InputError> {
        if active && self.history.len() < 2 {
            return Err(self.refuse(InputError::CompareUnavailable));
        }
        self.compare.set_active(active);
        Ok(())
    }

    pub fn begin_batch(
        &mut self,
        instruction: &str,
        operation: BatchOperation,
    ) -> Result<BatchTicket, InputError> {
        if self.busy {
            return Err(self.refuse(InputError::RequestInFlight));
        }
        let Some(inputs) = self
            .batch
            .as_ref()
            .filter(|job| !job.is_empty())
            .map(|job| job.inputs().to_vec())
        else {
            return Err(self.refuse(InputError::EmptyBatch));
        };
        let instruction = self.required_prompt(instruction)?;
        self.busy = true;
        self.error = None;
        Ok(BatchTicket {
            epoch: self.epoch,
            operation,
            instruction,
            inputs,
        })
    }

    /// Replaces the batch outputs with a finished run. Failed items are
    /// `None`; any failure leaves a summary message on the banner.
    pub fn commit_batch(
        &mut self,
        ticket: &BatchTicket,
        outputs: Vec<Option<ImageBlob>>,
    ) -> Result<CommitOutcome> {
        if ticket.epoch != self.epoch {
            return Ok(CommitOutcome::Stale);
        }
        self.busy = false;
        let Some(job) = self.batch.as_mut() else {
            return Ok(CommitOutcome::Stale);
        };
        job.replace_outputs(outputs)?;
        let total = job.len();
        let failed = total - job.succeeded();
        self.stats.batch_items += total as u64;
        self.stats.batch_failed += failed as u64;
        self.error = failure_summary(failed, total);
        if failed == total {
            return Ok(CommitOutcome::Failed);
        }
        Ok(CommitOutcome::Applied)
    }

    pub fn status(&self) -> Status {
        Status {
            version: self.history.cursor().map(|cursor| cursor + 1),
            versions: self.history.len(),
            can_undo: self.history.can_undo() && !self.busy,
            can_redo: self.history.can_redo() && !self.busy,
            hotspot: self.hotspot.map(|hotspot| hotspot.source_pixels()),
            compare: self
                .compare
                .is_active()
                .then(|| self.compare.position()),
            batch: self
                .batch
                .as_ref()
                .map(|job| (job.succeeded(), job.len())),
            busy: self.busy,
        }
    }

    pub fn summary(&self, started_at: &str) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            started_at: started_at.to_string(),
            finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            total_versions: self.history.len() as u64,
            cursor: self.history.cursor().map(|cursor| cursor as u64),
            edits_succeeded: self.stats.edits_succeeded,
            edits_failed: self.stats.edits_failed,
            batch_items: self.stats.batch_items,
            batch_failed: self.stats.batch_failed,
        }
    }

    fn required_prompt(&mut self, prompt: &str) -> Result<String, InputError> {
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(self.refuse(InputError::MissingPrompt));
        }
        Ok(trimmed.to_string())
    }

    fn refuse(&mut self, err: InputError) -> InputError {
        self.error = Some(err.to_string());
        err
    }
}

/// Snapshot for a one-line status display.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub version: Option<usize>,
    pub versions: usize,
    pub can_undo: bool,
    pub can_redo: bool,
    pub hotspot: Option<(u32, u32)>,
    pub compare: Option<f64>,
    pub batch: Option<(usize, usize)>,
    pub busy: bool,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "version {version}/{}", self.versions)?,
            None => f.write_str("no image")?,
        }
        write!(
            f,
            " | undo: {} | redo: {}",
            yes_no(self.can_undo),
            yes_no(self.can_redo)
        )?;
        if let Some((x, y)) = self.hotspot {
            write!(f, " | hotspot: ({x}, {y})")?;
        }
        match self.compare {
            Some(position) => write!(f, " | compare: {position:.0}%")?,
            None => f.write_str(" | compare: off")?,
        }
        if let Some((done, total)) = self.batch {
            write!(f, " | batch: {done}/{total} ready")?;
        }
        if self.busy {
            f.write_str(" | working")?;
        }
        Ok(())
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use crate::blob::testing::blob;

    use super::*;

    fn loaded() -> EditorState {
        let mut state = EditorState::with_session_id("session-1");
        state.load_image(blob("v0.png", 0));
        state
    }

    fn spot() -> Hotspot {
        Hotspot {
            display: Point::new(10.0, 10.0),
            source: Point::new(10.0, 10.0),
        }
    }

    fn filter(prompt: &str) -> EditRequest {
        EditRequest::Filter {
            prompt: prompt.to_string(),
        }
    }

    #[test]
    fn edits_need_a_loaded_image() {
        let mut state = EditorState::with_session_id("session-1");
        let err = state.begin_edit(filter("sepia")).unwrap_err();
        assert_eq!(err, InputError::NoImageLoaded);
        assert_eq!(state.error(), Some("No image loaded to edit."));
        assert!(!state.is_busy());
    }

    #[test]
    fn localized_edit_needs_prompt_then_hotspot() {
        let mut state = loaded();
        let err = state
            .begin_edit(EditRequest::Localized {
                prompt: "   ".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, InputError::MissingPrompt);

        let err = state
            .begin_edit(EditRequest::Localized {
                prompt: "make sky blue".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, InputError::MissingHotspot);
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn successful_commit_appends_and_clears_transient_state() {
        let mut state = loaded();
        state.set_hotspot(Some(spot()));
        let ticket = state
            .begin_edit(EditRequest::Localized {
                prompt: "make sky blue".to_string(),
            })
            .unwrap();
        assert!(state.is_busy());
        assert_eq!(ticket.edit().prompt(), Some("make sky blue"));

        let outcome = state.commit_edit(&ticket, Ok(blob("b.png", 1)));
        assert_eq!(outcome, CommitOutcome::Applied);
        assert!(!state.is_busy());
        assert!(state.hotspot().is_none());
        assert!(!state.compare().is_active());
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.history().cursor(), Some(1));
        assert_eq!(
            state.history().current().map(|v| v.operation()),
            Some("localized_edit")
        );
    }

    #[test]
    fn second_request_is_refused_while_one_is_in_flight() {
        let mut state = loaded();
        let _ticket = state.begin_edit(filter("sepia")).unwrap();
        assert_eq!(
            state.begin_edit(filter("noir")).unwrap_err(),
            InputError::RequestInFlight
        );
        assert!(!state.undo());
    }

    #[test]
    fn abandoned_ticket_frees_the_session() {
        let mut state = loaded();
        let ticket = state.begin_edit(filter("sepia")).unwrap();
        state.abandon(ticket.epoch());
        assert!(!state.is_busy());
        assert_eq!(state.history().len(), 1);

        let ticket = state.begin_edit(filter("noir")).unwrap();
        state.load_image(blob("other.png", 3));
        let next = state.begin_edit(filter("noir")).unwrap();
        state.abandon(ticket.epoch());
        assert!(state.is_busy());
        state.abandon(next.epoch());
        assert!(!state.is_busy());
    }

    #[test]
    fn failed_commit_keeps_history_and_sets_banner() {
        let mut state = loaded();
        let ticket = state.begin_edit(filter("sepia")).unwrap();
        let outcome = state.commit_edit(&ticket, Err("blocked".to_string()));
        assert_eq!(outcome, CommitOutcome::Failed);
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.error(), Some("blocked"));
        assert!(!state.is_busy());
        state.dismiss_error();
        assert!(state.error().is_none());
    }

    #[test]
    fn stale_result_after_new_upload_is_discarded() {
        let mut state = loaded();
        let ticket = state.begin_edit(filter("sepia")).unwrap();
        state.load_image(blob("other.png", 7));
        let outcome = state.commit_edit(&ticket, Ok(blob("late.png", 8)));
        assert_eq!(outcome, CommitOutcome::Stale);
        assert_eq!(state.history().len(), 1);
        assert_eq!(
            state.current_image().map(ImageBlob::name),
            Some("other.png")
        );
    }

    #[test]
    fn composite_seeds_a_fresh_lineage() {
        let mut state = loaded();
        let first = state.begin_edit(filter("sepia")).unwrap();
        state.commit_edit(&first, Ok(blob("f.png", 1)));
        let ticket = state
            .begin_edit(EditRequest::Composite {
                subject: blob("s.png", 2),
                scene: blob("c.png", 3),
                style: blob("y.png", 4),
            })
            .unwrap();
        state.commit_edit(&ticket, Ok(blob("whisk.png", 5)));
        assert_eq!(state.history().len(), 1);
        assert_eq!(
            state.original_image().map(ImageBlob::name),
            Some("whisk.png")
        );
    }

    #[test]
    fn compare_needs_two_versions_and_resets_on_append() {
        let mut state = loaded();
        assert_eq!(
            state.set_compare_active(true).unwrap_err(),
            InputError::CompareUnavailable
        );
        let ticket = state.begin_edit(filter("sepia")).unwrap();
        state.commit_edit(&ticket, Ok(blob("f.png", 1)));
        state.set_compare_active(true).unwrap();
        state.compare_mut().pointer_down();
        state.compare_mut().pointer_move(0.0, 0.0, 100.0);
        assert_eq!(state.compare().position(), 0.0);

        let ticket = state.begin_edit(filter("noir")).unwrap();
        state.commit_edit(&ticket, Ok(blob("g.png", 2)));
        assert!(!state.compare().is_active());
        assert_eq!(state.compare().position(), 50.0);
    }

    #[test]
    fn navigation_clears_hotspot_only_when_cursor_moves() {
        let mut state = loaded();
        state.set_hotspot(Some(spot()));
        assert!(!state.undo());
        assert!(state.hotspot().is_some());

        let ticket = state.begin_edit(filter("sepia")).unwrap();
        state.commit_edit(&ticket, Ok(blob("f.png", 1)));
        state.set_hotspot(Some(spot()));
        assert!(state.undo());
        assert!(state.hotspot().is_none());
        state.set_hotspot(Some(spot()));
        assert!(state.redo());
        assert!(state.hotspot().is_none());
        assert!(state.reset_to_origin());
        assert_eq!(state.history().cursor(), Some(0));
    }

    #[test]
    fn batch_commit_reports_partial_failure() -> anyhow::Result<()> {
        let mut state = EditorState::with_session_id("session-1");
        state.load_batch(vec![blob("a.png", 1), blob("b.png", 2), blob("c.png", 3)])?;
        let ticket = state.begin_batch("sepia", BatchOperation::Filter)?;
        assert_eq!(ticket.inputs().len(), 3);

        let outcome = state.commit_batch(
            &ticket,
            vec![Some(blob("a2.png", 4)), None, Some(blob("c2.png", 6))],
        )?;
        assert_eq!(outcome, CommitOutcome::Applied);
        assert_eq!(
            state.error(),
            Some("1 out of 3 images could not be processed.")
        );
        assert_eq!(state.stats().batch_failed, 1);
        Ok(())
    }

    #[test]
    fn batch_needs_inputs_and_instruction() -> anyhow::Result<()> {
        let mut state = EditorState::with_session_id("session-1");
        assert_eq!(
            state.begin_batch("sepia", BatchOperation::Filter).unwrap_err(),
            InputError::EmptyBatch
        );
        assert_eq!(state.load_batch(Vec::new()).unwrap_err(), InputError::EmptyBatch);
        state.load_batch(vec![blob("a.png", 1)])?;
        assert_eq!(
            state.begin_batch(" ", BatchOperation::Filter).unwrap_err(),
            InputError::MissingPrompt
        );
        Ok(())
    }

    #[test]
    fn start_over_discards_in_flight_batch() -> anyhow::Result<()> {
        let mut state = EditorState::with_session_id("session-1");
        state.load_batch(vec![blob("a.png", 1)])?;
        let ticket = state.begin_batch("sepia", BatchOperation::Filter)?;
        state.start_over();
        let outcome = state.commit_batch(&ticket, vec![Some(blob("a2.png", 2))])?;
        assert_eq!(outcome, CommitOutcome::Stale);
        assert!(state.batch().is_none());
        Ok(())
    }

    #[test]
    fn status_line_reflects_position() {
        let mut state = loaded();
        let ticket = state.begin_edit(filter("sepia")).unwrap();
        state.commit_edit(&ticket, Ok(blob("f.png", 1)));
        let line = state.status().to_string();
        assert_eq!(line, "version 2/2 | undo: yes | redo: no | compare: off");
    }
}
