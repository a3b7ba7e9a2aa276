pub mod batch;
pub mod export;
pub mod fetch;
pub mod gateway;
pub mod prompts;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use retouch_contracts::blob::ImageBlob;
use retouch_contracts::errors::InputError;
use retouch_contracts::events::{EventPayload, EventWriter};
use retouch_contracts::hotspot::{Dims, Hotspot, Point};
use retouch_contracts::session::{
    BatchOperation, CommitOutcome, EditRequest, EditTicket, EditorState, Status,
};
use retouch_contracts::summary::write_summary;
use serde_json::{json, Map, Value};

use crate::batch::{run_batch, BatchOptions, BatchReport, BatchSettlement};
use crate::gateway::{
    default_provider_name, default_provider_registry, Exchange, GatewayOptions,
    GenerationFailure, GenerationGateway, ImageProvider,
};

/// Everything needed to open an editing session.
#[derive(Debug, Clone, Default)]
pub struct EditorConfig {
    pub out_dir: PathBuf,
    /// Defaults to `<out_dir>/events.jsonl`.
    pub events_path: Option<PathBuf>,
    /// Keeps events in memory only; nothing is appended to `events_path`.
    pub disable_event_log: bool,
    /// Defaults to `RETOUCH_PROVIDER`, then `gemini` with a key, else `dryrun`.
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Defaults to `RETOUCH_BATCH_CONCURRENCY`; unset means unbounded.
    pub max_concurrency: Option<usize>,
    pub provider_options: Map<String, Value>,
}

impl EditorConfig {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            ..Self::default()
        }
    }
}

/// An editing session: the state controller wired to a gateway, the
/// diagnostics log and the local file system.
pub struct Editor {
    state: EditorState,
    gateway: GenerationGateway,
    events: EventWriter,
    http: HttpClient,
    out_dir: PathBuf,
    summary_path: PathBuf,
    started_at: String,
    max_concurrency: Option<usize>,
}

impl Editor {
    pub fn new(config: EditorConfig) -> Result<Self> {
        let provider_name = config
            .provider
            .clone()
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(default_provider_name);
        let options = GatewayOptions::new(config.model.clone(), config.provider_options.clone());
        let gateway =
            GenerationGateway::from_registry(&default_provider_registry(), &provider_name, options)?;
        Self::with_gateway(config, gateway)
    }

    /// Opens a session on an explicit provider, bypassing the registry.
    pub fn with_provider(config: EditorConfig, provider: Arc<dyn ImageProvider>) -> Result<Self> {
        let options = GatewayOptions::new(config.model.clone(), config.provider_options.clone());
        Self::with_gateway(config, GenerationGateway::new(provider, options))
    }

    fn with_gateway(config: EditorConfig, gateway: GenerationGateway) -> Result<Self> {
        std::fs::create_dir_all(&config.out_dir)
            .with_context(|| format!("failed to create {}", config.out_dir.display()))?;
        let state = EditorState::new();
        let events_path = config
            .events_path
            .clone()
            .unwrap_or_else(|| config.out_dir.join("events.jsonl"));
        let events = if config.disable_event_log {
            EventWriter::disabled(state.session_id())
        } else {
            EventWriter::new(events_path, state.session_id())
        };
        let max_concurrency = config.max_concurrency.or_else(|| {
            non_empty_env("RETOUCH_BATCH_CONCURRENCY").and_then(|value| value.parse().ok())
        });
        let started_at = now_utc_iso();

        events.emit(
            "session_started",
            map_object(json!({
                "out_dir": config.out_dir.to_string_lossy().to_string(),
                "provider": gateway.provider_name(),
                "model": gateway.options().model,
                "max_concurrency": max_concurrency,
            })),
        )?;

        Ok(Self {
            state,
            gateway,
            events,
            http: HttpClient::new(),
            summary_path: config.out_dir.join("summary.json"),
            out_dir: config.out_dir,
            started_at,
            max_concurrency,
        })
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn gateway(&self) -> &GenerationGateway {
        &self.gateway
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Path of the diagnostics log, `None` when it is disabled.
    pub fn events_path(&self) -> Option<&Path> {
        self.events.path()
    }

    /// Reads an image file; a non-image file is refused on the banner.
    pub fn read_image(&mut self, path: &Path) -> Result<ImageBlob> {
        self.refusing(ImageBlob::from_path(path))
    }

    pub fn open_path(&mut self, path: &Path) -> Result<()> {
        let image = self.read_image(path)?;
        self.load_image(image)
    }

    pub fn open_url(&mut self, url: &str) -> Result<()> {
        let fetched = fetch::fetch_image(&self.http, url);
        let image = self.refusing(fetched.map_err(anyhow::Error::from))?;
        self.load_image(image)
    }

    pub fn load_image(&mut self, image: ImageBlob) -> Result<()> {
        self.state.load_image(image.clone());
        self.events.emit(
            "image_loaded",
            map_object(json!({
                "name": image.name(),
                "mime_type": image.mime_type(),
                "bytes": image.len(),
                "version_id": image.short_id(),
                "epoch": self.state.epoch(),
            })),
        )?;
        Ok(())
    }

    pub fn select_hotspot(&mut self, display: Point, display_dims: Dims) -> Result<Hotspot> {
        let hotspot = self.state.select_hotspot(display, display_dims)?;
        let (x, y) = hotspot.source_pixels();
        self.events.emit(
            "hotspot_selected",
            map_object(json!({
                "display": { "x": display.x, "y": display.y },
                "source": { "x": x, "y": y },
            })),
        )?;
        Ok(hotspot)
    }

    /// Selects a hotspot given directly in source pixels.
    pub fn select_source_point(&mut self, point: Point) -> Result<Hotspot> {
        let natural = match self.state.current_image() {
            Some(image) => image.dimensions()?,
            None => return Err(self.refuse(InputError::NoImageLoaded)),
        };
        self.select_hotspot(point, natural)
    }

    /// Validates `request` and captures its inputs. The ticket can be
    /// generated off-thread with [`Editor::generate`] and must come back
    /// through [`Editor::commit`].
    pub fn begin(&mut self, request: EditRequest) -> Result<EditTicket> {
        let ticket = self.state.begin_edit(request)?;
        let edit = ticket.edit();
        let payload = map_object(json!({
            "operation": edit.operation().key(),
            "epoch": ticket.epoch(),
            "prompt": edit.prompt(),
            "inputs": edit.inputs().iter().map(|image| image.name()).collect::<Vec<_>>(),
            "provider": self.gateway.provider_name(),
            "model": self.gateway.options().model,
        }));
        self.emit_or_abandon(ticket.epoch(), "generation_started", payload)?;
        Ok(ticket)
    }

    pub fn generate(&self, ticket: &EditTicket) -> Exchange {
        self.gateway.exchange(ticket.edit())
    }

    /// Applies a generated result. The provider envelope of a failure is
    /// logged (image data redacted) with the `generation_failed` event.
    pub fn commit(&mut self, ticket: &EditTicket, exchange: Exchange) -> Result<CommitOutcome> {
        let Exchange { response, result } = exchange;
        let operation = ticket.edit().operation().key();
        let failure = result.as_ref().err().cloned();
        let produced = result.as_ref().ok().map(ImageBlob::short_id);
        let outcome = self
            .state
            .commit_edit(ticket, result.map_err(|failure| failure.to_string()));
        match outcome {
            CommitOutcome::Stale => {
                self.events.emit(
                    "stale_result_discarded",
                    map_object(json!({
                        "operation": operation,
                        "ticket_epoch": ticket.epoch(),
                        "current_epoch": self.state.epoch(),
                    })),
                )?;
            }
            CommitOutcome::Applied => {
                self.events.emit(
                    "generation_succeeded",
                    map_object(json!({
                        "operation": operation,
                        "version_id": produced,
                        "cursor": self.state.history().cursor(),
                        "versions": self.state.history().len(),
                    })),
                )?;
            }
            CommitOutcome::Failed => {
                let (kind, message) = failure
                    .map(|failure| (failure.kind(), failure.to_string()))
                    .unwrap_or(("unknown", String::new()));
                self.events.emit(
                    "generation_failed",
                    map_object(json!({
                        "operation": operation,
                        "kind": kind,
                        "message": message,
                        "response": response,
                    })),
                )?;
            }
        }
        Ok(outcome)
    }

    /// Runs one edit end to end on the calling thread.
    pub fn apply(&mut self, request: EditRequest) -> Result<CommitOutcome> {
        let ticket = self.begin(request)?;
        let result = self.generate(&ticket);
        self.commit(&ticket, result)
    }

    pub fn undo(&mut self) -> Result<bool> {
        let moved = self.state.undo();
        self.history_moved("undo", moved)?;
        Ok(moved)
    }

    pub fn redo(&mut self) -> Result<bool> {
        let moved = self.state.redo();
        self.history_moved("redo", moved)?;
        Ok(moved)
    }

    pub fn reset_to_origin(&mut self) -> Result<bool> {
        let moved = self.state.reset_to_origin();
        self.history_moved("reset", moved)?;
        Ok(moved)
    }

    /// Emits the event that opens a request; on a log failure the ticket is
    /// released so the session does not stay busy.
    fn emit_or_abandon(&mut self, epoch: u64, event_type: &str, payload: EventPayload) -> Result<()> {
        if let Err(err) = self.events.emit(event_type, payload) {
            self.state.abandon(epoch);
            return Err(err);
        }
        Ok(())
    }

    fn history_moved(&self, direction: &str, moved: bool) -> Result<()> {
        if !moved {
            return Ok(());
        }
        self.events.emit(
            "history_moved",
            map_object(json!({
                "direction": direction,
                "cursor": self.state.history().cursor(),
                "versions": self.state.history().len(),
            })),
        )?;
        Ok(())
    }

    pub fn set_compare_active(&mut self, active: bool) -> Result<()> {
        self.state.set_compare_active(active)?;
        Ok(())
    }

    /// Moves the slider handle as a drag would, without pointer events.
    pub fn set_compare_position(&mut self, percent: f64) -> Result<()> {
        if !self.state.compare().is_active() {
            self.state.set_compare_active(true)?;
        }
        self.state.compare_mut().set_position(percent);
        Ok(())
    }

    pub fn compare_pointer_down(&mut self) {
        self.state.compare_mut().pointer_down();
    }

    pub fn compare_pointer_move(
        &mut self,
        pointer_x: f64,
        container_left: f64,
        container_width: f64,
    ) -> Option<f64> {
        self.state
            .compare_mut()
            .pointer_move(pointer_x, container_left, container_width)
    }

    pub fn compare_pointer_up(&mut self) {
        self.state.compare_mut().pointer_up();
    }

    pub fn load_batch_paths(&mut self, paths: &[PathBuf]) -> Result<()> {
        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            images.push(self.read_image(path)?);
        }
        self.load_batch(images)
    }

    pub fn load_batch(&mut self, images: Vec<ImageBlob>) -> Result<()> {
        let names: Vec<String> = images.iter().map(|image| image.name().to_string()).collect();
        self.state.load_batch(images)?;
        self.events.emit(
            "image_loaded",
            map_object(json!({
                "batch": names,
                "epoch": self.state.epoch(),
            })),
        )?;
        Ok(())
    }

    /// Applies one filter or adjustment to every batch input concurrently
    /// and stores the aligned outputs. `on_settle` sees every item as it
    /// settles, in arrival order, with the running `processed/total`.
    /// Per-item errors and envelopes go to the event log; the banner only
    /// gets the aggregate count.
    pub fn run_batch(
        &mut self,
        instruction: &str,
        operation: BatchOperation,
        mut on_settle: impl FnMut(&BatchSettlement),
    ) -> Result<(CommitOutcome, BatchReport)> {
        let ticket = self.state.begin_batch(instruction, operation)?;
        let total = ticket.inputs().len();
        let payload = map_object(json!({
            "operation": operation.operation().key(),
            "instruction": ticket.instruction(),
            "total": total,
            "max_concurrency": self.max_concurrency,
        }));
        self.emit_or_abandon(ticket.epoch(), "batch_started", payload)?;

        let gateway = &self.gateway;
        let events = &self.events;
        let options = BatchOptions {
            max_concurrency: self.max_concurrency,
            progress: None,
        };
        let report = run_batch(
            ticket.inputs(),
            ticket.instruction(),
            |image, instruction| {
                gateway
                    .exchange(&operation.prepare(image.clone(), instruction))
                    .into_result()
            },
            &options,
            |settlement| {
                let _ = events.emit(
                    "batch_item_settled",
                    map_object(json!({
                        "index": settlement.index,
                        "processed": settlement.processed,
                        "total": settlement.total,
                        "ok": settlement.error.is_none(),
                        "error": settlement.error,
                        "response": settlement.response,
                    })),
                );
                on_settle(settlement);
            },
        );

        let outcome = self.state.commit_batch(&ticket, report.outputs.clone())?;
        self.events.emit(
            "batch_finished",
            map_object(json!({
                "operation": operation.operation().key(),
                "outcome": format!("{outcome:?}").to_ascii_lowercase(),
                "succeeded": report.succeeded(),
                "failed": report.failures.len(),
                "total": total,
                "summary": report.summary,
            })),
        )?;
        Ok((outcome, report))
    }

    /// Saves the current version into `dir` (the output directory when
    /// `None`).
    pub fn save_current(&mut self, dir: Option<&Path>) -> Result<PathBuf> {
        let Some(image) = self.state.current_image().cloned() else {
            return Err(self.refuse(InputError::NoImageLoaded));
        };
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(|| self.out_dir.clone());
        let path = export::save_image(&image, &dir)?;
        self.export_written("image", &path, 1)?;
        Ok(path)
    }

    /// Writes every produced batch output into one archive, by default
    /// `<out_dir>/retouch-batch.zip`.
    pub fn save_batch(&mut self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.out_dir.join(export::DEFAULT_ARCHIVE_NAME));
        let written = match self.state.batch() {
            Some(job) => export::write_batch_archive(job, &path).map(|path| (path, job.succeeded())),
            None => Err(InputError::NothingToDownload.into()),
        };
        let (path, entries) = self.refusing(written)?;
        self.export_written("batch_archive", &path, entries)?;
        Ok(path)
    }

    fn export_written(&self, kind: &str, path: &Path, entries: usize) -> Result<()> {
        self.events.emit(
            "export_written",
            map_object(json!({
                "kind": kind,
                "path": path.to_string_lossy().to_string(),
                "entries": entries,
            })),
        )?;
        Ok(())
    }

    pub fn start_over(&mut self) {
        self.state.start_over();
    }

    pub fn dismiss_error(&mut self) {
        self.state.dismiss_error();
    }

    pub fn finish(&mut self) -> Result<PathBuf> {
        let summary = self.state.summary(&self.started_at);
        let extra = map_object(json!({
            "provider": self.gateway.provider_name(),
            "model": self.gateway.options().model,
        }));
        write_summary(&self.summary_path, &summary, Some(&extra))?;
        self.events.emit(
            "session_finished",
            map_object(json!({
                "summary_path": self.summary_path.to_string_lossy().to_string(),
            })),
        )?;
        Ok(self.summary_path.clone())
    }

    /// Puts the message of a typed refusal on the banner before passing the
    /// error on.
    fn refusing<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if let Some(input) = err.downcast_ref::<InputError>() {
                self.state.set_error(input.to_string());
            }
        }
        result
    }

    fn refuse(&mut self, err: InputError) -> anyhow::Error {
        self.state.set_error(err.to_string());
        err.into()
    }
}

/// The message to show for `err`: the refusal or failure text for typed
/// errors, the flattened chain otherwise.
pub fn user_message(err: &anyhow::Error) -> String {
    if let Some(input) = err.downcast_ref::<InputError>() {
        return input.to_string();
    }
    if let Some(failure) = err.downcast_ref::<GenerationFailure>() {
        return failure.to_string();
    }
    error_chain_text(err, 512)
}

/// One line for an error and its causes, repeated causes collapsed, capped
/// at `max_chars`.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut causes: Vec<String> = err
        .chain()
        .map(|cause| cause.to_string().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();
    causes.dedup();
    truncate_text(&causes.join(": "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &value[..cut]),
        None => value.to_string(),
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use anyhow::bail;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use retouch_contracts::session::EditOperation;

    use super::gateway::GenerationRequest;
    use super::*;

    fn png(width: u32, height: u32, shade: u8) -> ImageBlob {
        let image = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        ImageBlob::sniffed(out, format!("shade-{shade}.png")).unwrap()
    }

    /// Answers every request with an image whose shade counts the calls,
    /// or with a text-only envelope when the prompt mentions "refuse".
    struct CountingProvider {
        calls: Mutex<u8>,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: Mutex::new(0),
            }
        }
    }

    impl ImageProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Value> {
            if request.prompt.contains("refuse") {
                return Ok(json!({
                    "candidates": [{ "content": { "parts": [{ "text": "No." }] }, "finishReason": "STOP" }]
                }));
            }
            if request.prompt.contains("explode") {
                bail!("socket closed");
            }
            if request.prompt.contains("forbidden") {
                return Ok(json!({
                    "promptFeedback": { "blockReason": "SAFETY" },
                    "candidates": [{ "content": { "parts": [png(2, 2, 9).to_inline_part()] } }]
                }));
            }
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            Ok(json!({
                "candidates": [{
                    "content": { "parts": [png(4, 4, 100 + *calls).to_inline_part()] },
                    "finishReason": "STOP",
                }]
            }))
        }
    }

    fn editor(temp: &Path) -> anyhow::Result<Editor> {
        Editor::with_provider(EditorConfig::new(temp), Arc::new(CountingProvider::new()))
    }

    fn event_types(path: &Path) -> anyhow::Result<Vec<String>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    #[test]
    fn failed_generation_keeps_history_and_logs_kind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut editor = editor(temp.path())?;
        editor.load_image(png(8, 8, 1))?;

        let outcome = editor.apply(EditRequest::Filter {
            prompt: "please refuse".to_string(),
        })?;
        assert_eq!(outcome, CommitOutcome::Failed);
        assert_eq!(editor.state().history().len(), 1);
        assert!(!editor.state().is_busy());
        assert!(editor
            .state()
            .error()
            .unwrap_or_default()
            .contains("did not return an image for the filter"));

        let raw = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        let failed = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .find(|row| row["type"] == json!("generation_failed"))
            .unwrap();
        assert_eq!(failed["kind"], json!("no_image"));
        assert_eq!(failed["operation"], json!("filter"));
        Ok(())
    }

    #[test]
    fn transport_errors_surface_as_messages() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut editor = editor(temp.path())?;
        editor.load_image(png(8, 8, 1))?;
        let outcome = editor.apply(EditRequest::Adjustment {
            prompt: "explode".to_string(),
        })?;
        assert_eq!(outcome, CommitOutcome::Failed);
        assert!(editor
            .state()
            .error()
            .unwrap_or_default()
            .contains("socket closed"));
        Ok(())
    }

    #[test]
    fn refusals_are_typed_and_reach_the_banner() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut editor = editor(temp.path())?;
        let err = editor.apply(EditRequest::Enhance).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputError>(),
            Some(&InputError::NoImageLoaded)
        );
        assert_eq!(user_message(&err), "No image loaded to edit.");

        let err = editor.save_batch(None).unwrap_err();
        assert_eq!(user_message(&err), "There are no processed images to download.");
        assert_eq!(
            editor.state().error(),
            Some("There are no processed images to download.")
        );
        assert!(!temp.path().join("retouch-batch.zip").exists());
        Ok(())
    }

    #[test]
    fn late_result_after_new_upload_is_discarded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut editor = editor(temp.path())?;
        editor.load_image(png(8, 8, 1))?;
        let ticket = editor.begin(EditRequest::Enhance)?;
        let result = editor.generate(&ticket);

        editor.load_image(png(8, 8, 2))?;
        let outcome = editor.commit(&ticket, result)?;
        assert_eq!(outcome, CommitOutcome::Stale);
        assert_eq!(editor.state().history().len(), 1);
        assert_eq!(
            editor.state().current_image().map(ImageBlob::name),
            Some("shade-2.png")
        );
        let types = event_types(&temp.path().join("events.jsonl"))?;
        assert!(types.contains(&"stale_result_discarded".to_string()));
        Ok(())
    }

    #[test]
    fn source_point_hotspot_then_localized_edit() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut editor = editor(temp.path())?;
        editor.load_image(png(20, 10, 1))?;
        let hotspot = editor.select_source_point(Point::new(30.0, 4.0))?;
        assert_eq!(hotspot.source_pixels(), (19, 4));

        let outcome = editor.apply(EditRequest::Localized {
            prompt: "add a hat".to_string(),
        })?;
        assert_eq!(outcome, CommitOutcome::Applied);
        assert!(editor.state().hotspot().is_none());
        assert_eq!(
            editor.state().history().current().map(|v| v.operation()),
            Some(EditOperation::Localized.key())
        );
        Ok(())
    }

    #[test]
    fn compare_position_requires_two_versions() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut editor = editor(temp.path())?;
        editor.load_image(png(8, 8, 1))?;
        assert!(editor.set_compare_position(30.0).is_err());
        editor.apply(EditRequest::Enhance)?;
        editor.set_compare_position(130.0)?;
        assert_eq!(editor.state().compare().position(), 100.0);

        editor.compare_pointer_down();
        assert_eq!(editor.compare_pointer_move(25.0, 0.0, 100.0), Some(25.0));
        editor.compare_pointer_up();
        assert_eq!(editor.compare_pointer_move(75.0, 0.0, 100.0), None);
        Ok(())
    }

    #[test]
    fn save_and_finish_write_files_and_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut editor = editor(temp.path())?;
        editor.load_image(png(8, 8, 1))?;
        editor.apply(EditRequest::Enhance)?;
        let saved = editor.save_current(None)?;
        assert_eq!(
            saved.file_name().and_then(|v| v.to_str()),
            Some("retouch-shade-1.png")
        );

        let summary_path = editor.finish()?;
        let summary: Value = serde_json::from_str(&std::fs::read_to_string(summary_path)?)?;
        assert_eq!(summary["total_versions"], json!(2));
        assert_eq!(summary["edits_succeeded"], json!(1));
        assert_eq!(summary["provider"], json!("counting"));

        let types = event_types(&temp.path().join("events.jsonl"))?;
        assert_eq!(types.first().map(String::as_str), Some("session_started"));
        assert_eq!(types.last().map(String::as_str), Some("session_finished"));
        assert!(types.contains(&"export_written".to_string()));
        Ok(())
    }

    #[test]
    fn event_log_never_contains_inline_image_data() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut editor = editor(temp.path())?;
        editor.load_image(png(8, 8, 1))?;
        editor.apply(EditRequest::Enhance)?;
        let payload = png(4, 4, 101).to_inline_part();
        let data = payload["inlineData"]["data"].as_str().unwrap_or_default();
        let raw = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        assert!(!data.is_empty());
        assert!(!raw.contains(data));
        Ok(())
    }

    /// Swaps the event log for a directory of the same name so appends fail.
    fn break_event_log(path: &Path) -> anyhow::Result<()> {
        std::fs::remove_file(path)?;
        std::fs::create_dir(path)?;
        Ok(())
    }

    fn restore_event_log(path: &Path) -> anyhow::Result<()> {
        std::fs::remove_dir(path)?;
        Ok(())
    }

    #[test]
    fn unwritable_event_log_does_not_leave_the_session_busy() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = temp.path().join("events.jsonl");
        let mut editor = editor(temp.path())?;
        editor.load_image(png(8, 8, 1))?;

        break_event_log(&log)?;
        let err = editor.begin(EditRequest::Enhance).unwrap_err();
        assert!(err.to_string().contains("failed to open event log"));
        assert!(!editor.state().is_busy());
        assert_eq!(editor.state().history().len(), 1);

        restore_event_log(&log)?;
        assert_eq!(editor.apply(EditRequest::Enhance)?, CommitOutcome::Applied);
        assert!(editor.undo()?);
        Ok(())
    }

    #[test]
    fn unwritable_event_log_does_not_block_the_next_batch() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = temp.path().join("events.jsonl");
        let mut editor = editor(temp.path())?;
        editor.load_batch(vec![png(4, 4, 1), png(4, 4, 2)])?;

        break_event_log(&log)?;
        assert!(editor
            .run_batch("sepia", BatchOperation::Filter, |_| {})
            .is_err());
        assert!(!editor.state().is_busy());

        restore_event_log(&log)?;
        let (outcome, report) = editor.run_batch("sepia", BatchOperation::Filter, |_| {})?;
        assert_eq!(outcome, CommitOutcome::Applied);
        assert_eq!(report.succeeded(), 2);
        Ok(())
    }

    #[test]
    fn failure_envelope_is_logged_with_image_data_redacted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut editor = editor(temp.path())?;
        editor.load_image(png(8, 8, 1))?;
        let outcome = editor.apply(EditRequest::Filter {
            prompt: "something forbidden".to_string(),
        })?;
        assert_eq!(outcome, CommitOutcome::Failed);

        let raw = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        let failed = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .find(|row| row["type"] == json!("generation_failed"))
            .unwrap();
        assert_eq!(failed["kind"], json!("blocked"));
        let response = &failed["response"];
        assert_eq!(response["promptFeedback"]["blockReason"], json!("SAFETY"));
        let inline = &response["candidates"][0]["content"]["parts"][0]["inlineData"];
        assert_eq!(inline["data"], json!("<omitted>"));
        assert_eq!(inline["mimeType"], json!("image/png"));
        Ok(())
    }

    #[test]
    fn disabled_event_log_writes_no_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = EditorConfig {
            disable_event_log: true,
            ..EditorConfig::new(temp.path())
        };
        let mut editor = Editor::with_provider(config, Arc::new(CountingProvider::new()))?;
        assert!(editor.events_path().is_none());
        editor.load_image(png(8, 8, 1))?;
        editor.apply(EditRequest::Enhance)?;
        assert!(!temp.path().join("events.jsonl").exists());
        Ok(())
    }

    #[test]
    fn non_image_file_is_refused_on_the_banner() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let notes = temp.path().join("notes.txt");
        std::fs::write(&notes, "not a picture")?;
        let mut editor = editor(temp.path())?;
        let err = editor.read_image(&notes).unwrap_err();
        assert_eq!(editor.state().error(), Some(user_message(&err).as_str()));
        assert_eq!(
            err.downcast_ref::<InputError>().map(InputError::kind),
            Some("not_an_image")
        );
        Ok(())
    }

    #[test]
    fn user_message_flattens_plain_errors() {
        let err = anyhow::anyhow!("disk full").context("failed to write summary");
        assert_eq!(
            user_message(&err),
            "failed to write summary: disk full"
        );
    }

    #[test]
    fn truncate_text_appends_ellipsis() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
