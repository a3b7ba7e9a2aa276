use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use retouch_contracts::commands::{parse_command, Intent, HELP_COMMANDS};
use retouch_contracts::errors::InputError;
use retouch_contracts::hotspot::{Dims, Point};
use retouch_contracts::session::{BatchOperation, CommitOutcome, EditRequest};
use retouch_engine::batch::BatchSettlement;
use retouch_engine::gateway::GenerationFailure;
use retouch_engine::prompts::{expand_preset, Preset, ADJUSTMENT_PRESETS, FILTER_PRESETS};
use retouch_engine::{user_message, Editor, EditorConfig};
use serde_json::{Map, Value};

#[derive(Debug, Parser)]
#[command(name = "retouch", version, about = "Prompt-driven photo retouching")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive editing session.
    Session(SessionArgs),
    /// Apply one edit to an image and save the result.
    Edit(EditArgs),
    /// Apply one filter or adjustment to many images and archive the results.
    Batch(BatchArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Do not write the JSONL event log.
    #[arg(long, conflicts_with = "events")]
    no_event_log: bool,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    concurrency: Option<usize>,
    /// Provider option as key=value, e.g. request_timeout=60.
    #[arg(long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Image to open on start.
    #[arg(long)]
    image: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EditKind {
    Edit,
    Filter,
    Adjust,
    Extend,
    Backdrop,
    Enhance,
    Composite,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, value_enum)]
    op: EditKind,
    /// Input images: one, two for backdrop (photo, background), three for
    /// composite (subject, scene, style).
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    prompt: Option<String>,
    /// Hotspot in source pixels as x,y.
    #[arg(long, value_delimiter = ',', num_args = 2)]
    spot: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BatchKind {
    Filter,
    Adjust,
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, value_enum)]
    op: BatchKind,
    #[arg(long)]
    prompt: String,
    /// Archive path; defaults to <out>/retouch-batch.zip.
    #[arg(long)]
    archive: Option<PathBuf>,
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Session(args) => {
            run_session(args)?;
            Ok(0)
        }
        Command::Edit(args) => run_edit(args),
        Command::Batch(args) => run_batch(args),
    }
}

fn editor_config(common: &CommonArgs) -> Result<EditorConfig> {
    Ok(EditorConfig {
        out_dir: common.out.clone(),
        events_path: common.events.clone(),
        disable_event_log: common.no_event_log,
        provider: common.provider.clone(),
        model: common.model.clone(),
        max_concurrency: common.concurrency,
        provider_options: parse_provider_options(&common.options)?,
    })
}

fn parse_provider_options(raw: &[String]) -> Result<Map<String, Value>> {
    let mut options = Map::new();
    for row in raw {
        let Some((key, value)) = row.split_once('=') else {
            bail!("--option expects KEY=VALUE, got '{row}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("--option expects KEY=VALUE, got '{row}'");
        }
        let value = value.trim();
        let parsed = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        options.insert(key.to_string(), parsed);
    }
    Ok(options)
}

fn run_session(args: SessionArgs) -> Result<()> {
    let mut editor = Editor::new(editor_config(&args.common)?)?;
    if let Some(path) = args.image.as_deref() {
        if let Err(err) = editor.open_path(path) {
            report(&err);
        }
    }

    let stdin = io::stdin();
    let mut line = String::new();
    println!(
        "Retouch session started with provider {}. Type /help for commands.",
        editor.gateway().provider_name()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_command(input);
        if intent.action == "noop" {
            continue;
        }
        if let Err(err) = handle_intent(&mut editor, &intent) {
            report(&err);
        }
    }

    let summary_path = editor.finish()?;
    println!("Session summary written to {}", summary_path.display());
    Ok(())
}

fn handle_intent(editor: &mut Editor, intent: &Intent) -> Result<()> {
    match intent.action.as_str() {
        "help" => {
            println!("Commands:");
            for row in HELP_COMMANDS {
                println!("  {row}");
            }
        }
        "presets" => {
            print_presets("Filters", FILTER_PRESETS);
            print_presets("Adjustments", ADJUSTMENT_PRESETS);
        }
        "status" => println!("{}", editor.status()),
        "dismiss" => editor.dismiss_error(),
        "start_over" => {
            editor.start_over();
            println!("Started over.");
        }
        "load_image" => {
            let path = required_path(intent, "/open")?;
            editor.open_path(&path)?;
            print_loaded(editor);
        }
        "load_url" => {
            let Some(url) = intent.arg_str("text") else {
                println!("/url requires a URL");
                return Ok(());
            };
            editor.open_url(url)?;
            print_loaded(editor);
        }
        "select_hotspot" => {
            let (Some(x), Some(y)) = (intent.arg_f64("x"), intent.arg_f64("y")) else {
                return Ok(());
            };
            let hotspot = match (intent.arg_f64("width"), intent.arg_f64("height")) {
                (Some(width), Some(height)) => {
                    editor.select_hotspot(Point::new(x, y), Dims::new(width, height))?
                }
                _ => editor.select_source_point(Point::new(x, y))?,
            };
            let (sx, sy) = hotspot.source_pixels();
            println!("Hotspot set at ({sx}, {sy}).");
        }
        "localized_edit" => {
            let prompt = intent.prompt.clone().unwrap_or_default();
            apply(editor, EditRequest::Localized { prompt })?;
        }
        "filter" => {
            let text = intent.arg_str("text").unwrap_or_default();
            let prompt = expand_preset(FILTER_PRESETS, text).to_string();
            apply(editor, EditRequest::Filter { prompt })?;
        }
        "adjustment" => {
            let text = intent.arg_str("text").unwrap_or_default();
            let prompt = expand_preset(ADJUSTMENT_PRESETS, text).to_string();
            apply(editor, EditRequest::Adjustment { prompt })?;
        }
        "extend_backdrop" => apply(editor, EditRequest::ExtendBackdrop)?,
        "enhance" => apply(editor, EditRequest::Enhance)?,
        "replace_backdrop" => {
            let path = required_path(intent, "/backdrop")?;
            let background = editor.read_image(&path)?;
            apply(editor, EditRequest::ReplaceBackdrop { background })?;
        }
        "composite" => {
            let paths = intent.arg_strings("paths");
            let [subject, scene, style] = paths.as_slice() else {
                println!("/composite requires three paths: subject scene style");
                return Ok(());
            };
            let request = EditRequest::Composite {
                subject: editor.read_image(Path::new(subject))?,
                scene: editor.read_image(Path::new(scene))?,
                style: editor.read_image(Path::new(style))?,
            };
            apply(editor, request)?;
        }
        "undo" => print_moved(editor.undo()?, "Nothing to undo.", editor),
        "redo" => print_moved(editor.redo()?, "Nothing to redo.", editor),
        "reset" => print_moved(editor.reset_to_origin()?, "Already at the original.", editor),
        "compare" => {
            let text = intent.arg_str("text").unwrap_or("on");
            match parse_compare_arg(text) {
                Some(CompareArg::On) => editor.set_compare_active(true)?,
                Some(CompareArg::Off) => editor.set_compare_active(false)?,
                Some(CompareArg::Position(percent)) => editor.set_compare_position(percent)?,
                None => {
                    println!("/compare expects on, off or a percentage");
                    return Ok(());
                }
            }
            println!("{}", editor.status());
        }
        "load_batch" => {
            let paths: Vec<PathBuf> = intent
                .arg_strings("paths")
                .into_iter()
                .map(PathBuf::from)
                .collect();
            editor.load_batch_paths(&paths)?;
            println!("Loaded {} images for batch processing.", paths.len());
        }
        "batch_filter" => {
            let text = intent.arg_str("text").unwrap_or_default();
            let instruction = expand_preset(FILTER_PRESETS, text).to_string();
            batch(editor, &instruction, BatchOperation::Filter)?;
        }
        "batch_adjustment" => {
            let text = intent.arg_str("text").unwrap_or_default();
            let instruction = expand_preset(ADJUSTMENT_PRESETS, text).to_string();
            batch(editor, &instruction, BatchOperation::Adjustment)?;
        }
        "save_current" => {
            let dir = optional_path(intent);
            let path = editor.save_current(dir.as_deref())?;
            println!("Saved {}", path.display());
        }
        "save_batch" => {
            let target = optional_path(intent);
            let path = editor.save_batch(target.as_deref())?;
            println!("Saved {}", path.display());
        }
        "invalid" => {
            println!("{}", intent.arg_str("reason").unwrap_or("Invalid command"));
        }
        "unknown" => {
            println!(
                "Unknown command: /{}",
                intent.arg_str("command").unwrap_or_default()
            );
        }
        other => println!("Unhandled action: {other}"),
    }
    Ok(())
}

fn apply(editor: &mut Editor, request: EditRequest) -> Result<()> {
    let outcome = editor.apply(request)?;
    match outcome {
        CommitOutcome::Applied => println!("Done. {}", editor.status()),
        CommitOutcome::Failed => println!("! {}", editor.state().error().unwrap_or_default()),
        CommitOutcome::Stale => println!("Discarded a result for an image that is no longer open."),
    }
    Ok(())
}

fn batch(editor: &mut Editor, instruction: &str, operation: BatchOperation) -> Result<()> {
    let (outcome, report) = editor.run_batch(instruction, operation, |settled| {
        println!("{}", settlement_line(settled));
    })?;
    println!(
        "Batch finished: {}/{} images processed.",
        report.succeeded(),
        report.outputs.len()
    );
    if outcome != CommitOutcome::Stale {
        if let Some(message) = editor.state().error() {
            println!("! {message}");
        }
    }
    Ok(())
}

fn settlement_line(settled: &BatchSettlement) -> String {
    let verdict = if settled.error.is_some() { "failed" } else { "ready" };
    format!(
        "[{}/{}] image {} {verdict}",
        settled.processed,
        settled.total,
        settled.index + 1
    )
}

fn print_loaded(editor: &Editor) {
    if let Some(image) = editor.state().current_image() {
        let dims = image
            .dimensions()
            .map(|dims| format!("{}x{}", dims.width, dims.height))
            .unwrap_or_else(|_| "unknown size".to_string());
        println!("Loaded {} ({}, {dims}).", image.name(), image.mime_type());
    }
}

fn print_moved(moved: bool, unchanged: &str, editor: &Editor) {
    if moved {
        println!("{}", editor.status());
    } else {
        println!("{unchanged}");
    }
}

fn print_presets(title: &str, presets: &[Preset]) {
    println!("{title}:");
    for preset in presets {
        println!("  {:<16} {}", preset.name, preset.instruction);
    }
}

fn required_path(intent: &Intent, command: &str) -> Result<PathBuf> {
    match intent.arg_str("path") {
        Some(path) => Ok(PathBuf::from(path)),
        None => bail!("{command} requires a path"),
    }
}

fn optional_path(intent: &Intent) -> Option<PathBuf> {
    intent.arg_str("path").map(PathBuf::from)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareArg {
    On,
    Off,
    Position(f64),
}

fn parse_compare_arg(text: &str) -> Option<CompareArg> {
    let trimmed = text.trim().trim_end_matches('%');
    match trimmed.to_ascii_lowercase().as_str() {
        "" | "on" => Some(CompareArg::On),
        "off" => Some(CompareArg::Off),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(CompareArg::Position),
    }
}

/// Typed refusals and generation failures are part of normal use and go to
/// stdout; anything else is an unexpected error.
fn report(err: &anyhow::Error) {
    if err.downcast_ref::<InputError>().is_some()
        || err.downcast_ref::<GenerationFailure>().is_some()
    {
        println!("! {}", user_message(err));
    } else {
        eprintln!("retouch error: {err:#}");
    }
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let mut editor = Editor::new(editor_config(&args.common)?)?;
    let images = args
        .images
        .iter()
        .map(|path| editor.read_image(path))
        .collect::<Result<Vec<_>>>()?;
    let prompt = args.prompt.clone().unwrap_or_default();

    let request = match args.op {
        EditKind::Composite => {
            let [subject, scene, style] = images.as_slice() else {
                bail!("composite needs exactly three --image values (subject, scene, style)");
            };
            EditRequest::Composite {
                subject: subject.clone(),
                scene: scene.clone(),
                style: style.clone(),
            }
        }
        kind => {
            let Some(first) = images.first() else {
                bail!("--image is required");
            };
            editor.load_image(first.clone())?;
            match kind {
                EditKind::Edit => {
                    let Some([x, y]) = args.spot.as_deref().and_then(|v| <[f64; 2]>::try_from(v).ok())
                    else {
                        bail!("localized edits need --spot x,y");
                    };
                    editor.select_source_point(Point::new(x, y))?;
                    EditRequest::Localized { prompt }
                }
                EditKind::Filter => EditRequest::Filter {
                    prompt: expand_preset(FILTER_PRESETS, &prompt).to_string(),
                },
                EditKind::Adjust => EditRequest::Adjustment {
                    prompt: expand_preset(ADJUSTMENT_PRESETS, &prompt).to_string(),
                },
                EditKind::Extend => EditRequest::ExtendBackdrop,
                EditKind::Enhance => EditRequest::Enhance,
                EditKind::Backdrop => {
                    let Some(background) = images.get(1) else {
                        bail!("backdrop needs a second --image for the new background");
                    };
                    EditRequest::ReplaceBackdrop {
                        background: background.clone(),
                    }
                }
                EditKind::Composite => unreachable!("composite handled above"),
            }
        }
    };

    let outcome = editor.apply(request);
    let code = match outcome {
        Ok(CommitOutcome::Applied) => {
            let path = editor.save_current(None)?;
            println!("{}", path.display());
            0
        }
        Ok(_) => {
            eprintln!("{}", editor.state().error().unwrap_or("edit failed"));
            2
        }
        Err(err) => {
            eprintln!("{}", user_message(&err));
            2
        }
    };
    editor.finish()?;
    Ok(code)
}

fn run_batch(args: BatchArgs) -> Result<i32> {
    let mut editor = Editor::new(editor_config(&args.common)?)?;
    editor.load_batch_paths(&args.images)?;
    let (operation, instruction) = match args.op {
        BatchKind::Filter => (
            BatchOperation::Filter,
            expand_preset(FILTER_PRESETS, &args.prompt),
        ),
        BatchKind::Adjust => (
            BatchOperation::Adjustment,
            expand_preset(ADJUSTMENT_PRESETS, &args.prompt),
        ),
    };
    let (_, report) = editor.run_batch(instruction, operation, |settled| {
        eprintln!("{}", settlement_line(settled));
    })?;
    for failure in &report.failures {
        eprintln!("item {} failed: {}", failure.index + 1, failure.message);
    }
    if let Some(summary) = report.summary.as_deref() {
        eprintln!("{summary}");
    }

    let code = match editor.save_batch(args.archive.as_deref()) {
        Ok(path) => {
            println!("{}", path.display());
            0
        }
        Err(err) => {
            eprintln!("{}", user_message(&err));
            2
        }
    };
    editor.finish()?;
    Ok(code)
}
