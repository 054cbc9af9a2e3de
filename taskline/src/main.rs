use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone};
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use serde::Serialize;
use taskline::core::{
    CheckboxState, DateMarker, LineOptions, RecurrenceInfo, TaskCompletionResult,
};
use taskline::{mark_done_with_options, parse_task_line_with_options};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "taskline",
    about = "Complete and reschedule Markdown task lines",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// JSON file with line-reading options (e.g. the in-progress glyph).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mark a task done and print (or insert) its next occurrence.
    Done(DoneArgs),

    /// Show the checkbox, dates, duration and recurrence read from a line.
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
struct DoneArgs {
    /// The task line to complete.
    #[arg(long, conflicts_with_all = ["file", "line_number"], required_unless_present = "file")]
    line: Option<String>,
    /// Markdown file containing the task.
    #[arg(long, requires = "line_number")]
    file: Option<PathBuf>,
    /// 1-based line number of the task inside --file.
    #[arg(long)]
    line_number: Option<usize>,
    /// Rewrite --file, inserting the next occurrence below the completed task.
    #[arg(long, requires = "file")]
    in_place: bool,
    /// Completion date (YYYY-MM-DD). Defaults to the local date.
    #[arg(long)]
    today: Option<String>,
    /// Completion time (HH:MM, 24-hour). Defaults to the local time.
    #[arg(long)]
    now: Option<String>,
    /// Emit JSON instead of plain lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    /// The task line to read.
    line: String,
    /// Emit JSON instead of a human-readable summary.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let opts = load_options(cli.config.as_deref())?;
    match cli.command {
        Commands::Done(args) => handle_done(args, &opts),
        Commands::Inspect(args) => handle_inspect(args, &opts),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "taskline=debug,info"
    } else {
        "taskline=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_options(path: Option<&Path>) -> Result<LineOptions> {
    let Some(path) = path else {
        return Ok(LineOptions::default());
    };
    let raw = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let opts: LineOptions =
        serde_json::from_str(&raw).with_context(|| format!("parsing config {:?}", path))?;
    debug!(?path, glyph = %opts.in_progress_glyph, "loaded line options");
    Ok(opts)
}

fn handle_done(args: DoneArgs, opts: &LineOptions) -> Result<()> {
    let DoneArgs {
        line,
        file,
        line_number,
        in_place,
        today,
        now,
        json,
    } = args;

    let (today, now) = resolve_clock(today, now, &Local::now());

    let result = match (line, file) {
        (Some(line), _) => mark_done_with_options(&line, &today, &now, opts)?,
        (None, Some(path)) => {
            let line_number = line_number.context("--line-number is required with --file")?;
            let text = fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
            let (updated, result) =
                complete_in_document(&text, line_number, &today, &now, opts)
                    .with_context(|| format!("completing line {line_number} of {:?}", path))?;
            if in_place {
                fs::write(&path, updated.as_bytes())
                    .with_context(|| format!("writing {:?}", path))?;
                info!(?path, line_number, "task completed in place");
            } else if !json {
                print!("{updated}");
                return Ok(());
            }
            result
        }
        (None, None) => anyhow::bail!("either --line or --file is required"),
    };

    print_result(&result, json)
}

/// Fill missing `--today`/`--now` from a single reading of the clock.
fn resolve_clock<Tz>(
    today: Option<String>,
    now: Option<String>,
    clock: &DateTime<Tz>,
) -> (String, String)
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let today = today.unwrap_or_else(|| clock.format("%Y-%m-%d").to_string());
    let now = now.unwrap_or_else(|| clock.format("%H:%M").to_string());
    (today, now)
}

fn print_result(result: &TaskCompletionResult, json: bool) -> Result<()> {
    if json {
        let s = serde_json::to_string_pretty(result)?;
        println!("{s}");
        return Ok(());
    }
    println!("{}", result.completed_line);
    if let Some(next) = &result.next_task_line {
        println!("{next}");
    }
    Ok(())
}

/// Complete line `line_number` (1-based) of `text`, inserting the next occurrence
/// directly below it. Line endings of the document are preserved.
fn complete_in_document(
    text: &str,
    line_number: usize,
    today: &str,
    now: &str,
    opts: &LineOptions,
) -> Result<(String, TaskCompletionResult)> {
    if line_number == 0 {
        anyhow::bail!("line numbers start at 1");
    }

    let mut out = String::with_capacity(text.len() + 64);
    let mut result = None;
    for (idx, raw) in text.split_inclusive('\n').enumerate() {
        if idx + 1 != line_number {
            out.push_str(raw);
            continue;
        }

        let (body, ending) = split_line_ending(raw);
        let done = mark_done_with_options(body, today, now, opts)?;
        out.push_str(&done.completed_line);
        if let Some(next) = &done.next_task_line {
            out.push_str(if ending.is_empty() {
                document_line_ending(text)
            } else {
                ending
            });
            out.push_str(next);
        }
        out.push_str(ending);
        result = Some(done);
    }

    let result = result.with_context(|| {
        format!(
            "line {line_number} is past the end of the file ({} lines)",
            text.split_inclusive('\n').count()
        )
    })?;
    Ok((out, result))
}

fn split_line_ending(raw: &str) -> (&str, &str) {
    if let Some(body) = raw.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = raw.strip_suffix('\n') {
        (body, "\n")
    } else {
        (raw, "")
    }
}

fn document_line_ending(text: &str) -> &'static str {
    if text.contains("\r\n") { "\r\n" } else { "\n" }
}

#[derive(Debug, Serialize)]
struct LineSummary {
    checkbox: Option<CheckboxState>,
    dates: IndexMap<DateMarker, NaiveDate>,
    duration: Option<String>,
    time_log: Option<NaiveTime>,
    recurrence: Option<RecurrenceInfo>,
}

fn summarize(line: &str, opts: &LineOptions) -> LineSummary {
    let parsed = parse_task_line_with_options(line, opts);
    LineSummary {
        checkbox: parsed.checkbox(),
        dates: parsed.dates(),
        duration: parsed.duration().map(str::to_string),
        time_log: parsed.time_log(),
        recurrence: parsed.recurrence(),
    }
}

fn handle_inspect(args: InspectArgs, opts: &LineOptions) -> Result<()> {
    let InspectArgs { line, json } = args;
    let summary = summarize(&line, opts);

    if json {
        let s = serde_json::to_string_pretty(&summary)?;
        println!("{s}");
        return Ok(());
    }

    match summary.checkbox {
        Some(state) => println!("checkbox: {:?}", state),
        None => println!("checkbox: none"),
    }
    for (marker, date) in &summary.dates {
        println!("{}: {}", marker.name(), date.format("%Y-%m-%d"));
    }
    if let Some(duration) = &summary.duration {
        println!("duration: {duration}");
    }
    if let Some(time) = summary.time_log {
        println!("time: {}", time.format("%H:%M"));
    }
    match summary.recurrence {
        Some(rule) => println!("recurrence: {rule}"),
        None => println!("recurrence: none"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn document_completion_inserts_next_occurrence_below() {
        let text = "# Chores\n- [ ] Buy milk 📅 2024-01-10 🔁 every 1 week\n- [ ] Other\n";
        let (updated, result) =
            complete_in_document(text, 2, "2024-01-10", "09:00", &LineOptions::default())
                .expect("complete");

        assert_eq!(
            updated,
            "# Chores\n\
             - [x] Buy milk 📅 2024-01-10 (time::09:00) 🔁 every 1 week ✅ 2024-01-10\n\
             - [ ] Buy milk 📅 2024-01-17 🔁 every 1 week\n\
             - [ ] Other\n"
        );
        assert!(result.next_task_line.is_some());
    }

    #[test]
    fn document_completion_preserves_crlf_and_missing_final_newline() {
        let text = "- [ ] Other\r\n- [ ] Stretch 🔁 every day";
        let (updated, _) =
            complete_in_document(text, 2, "2024-01-10", "07:00", &LineOptions::default())
                .expect("complete");
        assert_eq!(
            updated,
            "- [ ] Other\r\n- [x] Stretch (time::07:00) 🔁 every day ✅ 2024-01-10\r\n- [ ] Stretch 🔁 every day"
        );
    }

    #[test]
    fn clock_defaults_come_from_one_reading() {
        let clock = chrono::Utc
            .with_ymd_and_hms(2024, 1, 10, 23, 59, 59)
            .single()
            .expect("valid instant");

        let (today, now) = resolve_clock(None, None, &clock);
        assert_eq!((today.as_str(), now.as_str()), ("2024-01-10", "23:59"));

        let (today, now) = resolve_clock(None, Some("08:00".into()), &clock);
        assert_eq!((today.as_str(), now.as_str()), ("2024-01-10", "08:00"));
    }

    #[test]
    fn document_completion_rejects_out_of_range_lines() {
        let opts = LineOptions::default();
        assert!(complete_in_document("- [ ] a\n", 2, "2024-01-10", "09:00", &opts).is_err());
        assert!(complete_in_document("- [ ] a\n", 0, "2024-01-10", "09:00", &opts).is_err());
    }

    #[test]
    fn document_completion_surfaces_bad_clock() {
        let err = complete_in_document("- [ ] a\n", 1, "2024-01-10", "25:00", &LineOptions::default())
            .expect_err("invalid now");
        assert!(err.to_string().contains("25:00"));
    }

    #[test]
    fn config_file_overrides_in_progress_glyph() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("taskline.json");
        fs::write(&path, r#"{ "in_progress_glyph": ">" }"#).expect("write config");

        let opts = load_options(Some(&path)).expect("load options");
        assert_eq!(opts.in_progress_glyph, '>');

        let summary = summarize("- [>] Draft 📅 2024-05-01", &opts);
        assert_eq!(summary.checkbox, Some(CheckboxState::InProgress));
    }

    #[test]
    fn missing_config_uses_defaults() {
        assert_eq!(load_options(None).expect("defaults"), LineOptions::default());
    }

    #[test]
    fn summary_lists_dates_in_line_order() {
        let summary = summarize(
            "- [ ] x ⏳ 2024-01-02 📅 2024-01-05 (duration::1h) 🔁 every 2 weeks when done",
            &LineOptions::default(),
        );
        let markers: Vec<_> = summary.dates.keys().copied().collect();
        assert_eq!(markers, vec![DateMarker::Scheduled, DateMarker::Due]);
        assert_eq!(summary.duration.as_deref(), Some("1h"));
        let rule = summary.recurrence.expect("recurring");
        assert_eq!(rule.interval, 2);
        assert!(rule.when_done);

        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(json["dates"]["scheduled"], "2024-01-02");
    }

    #[test]
    fn in_place_rewrite_round_trips_through_the_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("todo.md");
        fs::write(&path, "- [ ] Pay rent 📅 2024-01-31 🔁 every month\n").expect("write");

        handle_done(
            DoneArgs {
                line: None,
                file: Some(path.clone()),
                line_number: Some(1),
                in_place: true,
                today: Some("2024-01-31".into()),
                now: Some("09:00".into()),
                json: false,
            },
            &LineOptions::default(),
        )
        .expect("done");

        let written = fs::read_to_string(&path).expect("read back");
        assert_eq!(
            written,
            "- [x] Pay rent 📅 2024-01-31 (time::09:00) 🔁 every month ✅ 2024-01-31\n\
             - [ ] Pay rent 📅 2024-02-29 🔁 every month\n"
        );
    }
}
