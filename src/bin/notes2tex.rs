//! CLI binary for notes2tex.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints decisions.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use notes2tex::{
    discover_jobs, load_job, process_batch, process_job, recommend_mode, run_text,
    BatchProgressCallback, Decision, FidelityThresholds, FileCollaborator, Language, Mode,
    ModeSelection, PipelineConfig, ProgressCallback, Verdict,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

fn verdict_mark(verdict: Verdict) -> String {
    match verdict {
        Verdict::Accept => green("✓"),
        Verdict::AcceptWithWarnings => yellow("⚠"),
        Verdict::Reject => red("✗"),
    }
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar for batch runs; jobs finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    rejected: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} jobs  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Checking");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            rejected: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, job: &str) -> String {
        let ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(job))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_jobs: usize) {
        self.bar.set_length(total_jobs as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_jobs} jobs…"))
        ));
    }

    fn on_job_start(&self, job: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(job.to_string(), Instant::now());
        }
        self.bar.set_message(job.to_string());
    }

    fn on_job_complete(&self, job: &str, verdict: Verdict) {
        if verdict == Verdict::Reject {
            self.rejected.fetch_add(1, Ordering::SeqCst);
        }
        self.bar.println(format!(
            "  {} {:<32} {:<22} {}",
            verdict_mark(verdict),
            job,
            dim(&verdict.to_string()),
            self.elapsed(job),
        ));
        self.bar.inc(1);
    }

    fn on_job_error(&self, job: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<32} {}  {}",
            red("✗"),
            job,
            red(&msg),
            self.elapsed(job),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_jobs: usize, decided: usize) {
        self.bar.finish_and_clear();
        let failed = total_jobs.saturating_sub(decided);
        let rejected = self.rejected.load(Ordering::SeqCst);
        let accepted = decided.saturating_sub(rejected);
        let mark = if failed == 0 && rejected == 0 {
            green("✔")
        } else if accepted == 0 {
            red("✘")
        } else {
            yellow("⚠")
        };
        eprintln!(
            "{} {}/{} jobs accepted  ({} rejected, {} failed)",
            mark,
            bold(&accepted.to_string()),
            total_jobs,
            rejected,
            failed,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process one job directory (writes content.tex, meta.json, decision.json)
  notes2tex run jobs/lecture-03

  # Every job directory under jobs/, four at a time
  notes2tex batch jobs/ --concurrency 4

  # Check a raw model output against a transcript, no job directory
  notes2tex check --raw refined.txt --baseline transcript.txt --mode faithful

  # Which mode would auto-selection pick for this transcript?
  notes2tex classify transcript.txt

JOB DIRECTORY LAYOUT:
  job.json              optional context: language, page_count, figure_count, dropped_notes
  logs/transcript.txt   first-pass transcript (fidelity baseline)
  logs/refined.txt      second-pass output (logs/refined_<mode>.txt wins if present)
  figures/              figure assets referenced by the document

EXIT STATUS:
  0  every document accepted (possibly with warnings)
  1  a fatal error (malformed output, missing logs, I/O)
  2  at least one document rejected

ENVIRONMENT VARIABLES:
  NOTES2TEX_MODE          auto, faithful (strict) or readable (book)
  NOTES2TEX_LANGUAGE      en or ru; overrides detection
  NOTES2TEX_CONCURRENCY   jobs processed at once in batch mode
  RUST_LOG                tracing filter, overrides --verbose/--quiet
"#;

/// Normalize and fidelity-check model-generated LaTeX from handwritten notes.
#[derive(Parser, Debug)]
#[command(
    name = "notes2tex",
    version,
    about = "Normalize, validate and fidelity-score model-generated LaTeX",
    long_about = "Turn the raw second-pass output of a generative model into canonical LaTeX, \
score it against the first-pass transcript and accept or reject it against hard structural \
invariants.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    policy: PolicyArgs,

    /// Print decisions as JSON.
    #[arg(long, global = true, env = "NOTES2TEX_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "NOTES2TEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "NOTES2TEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "NOTES2TEX_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one job directory and write its artifact bundle.
    Run {
        /// Job directory holding logs/ and optionally job.json.
        job: PathBuf,
    },

    /// Process many job directories concurrently.
    Batch {
        /// Job directories, or one root whose subdirectories are jobs.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Check a raw model output against a baseline transcript.
    Check {
        /// Raw second-pass output.
        #[arg(long)]
        raw: PathBuf,

        /// First-pass transcript.
        #[arg(long)]
        baseline: PathBuf,

        /// Job directory to read job.json and figures/ from.
        #[arg(long)]
        context: Option<PathBuf>,

        /// Write the normalized LaTeX body here.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the mode auto-selection would choose for a transcript.
    Classify {
        /// Transcript file.
        transcript: PathBuf,
    },
}

#[derive(Args, Debug)]
struct PolicyArgs {
    /// Normalization mode.
    #[arg(long, global = true, env = "NOTES2TEX_MODE", value_enum, default_value = "auto")]
    mode: ModeArg,

    /// Document language; detected when unset.
    #[arg(long, global = true, env = "NOTES2TEX_LANGUAGE", value_enum)]
    language: Option<LanguageArg>,

    /// Jobs processed at once in batch mode.
    #[arg(short, long, global = true, env = "NOTES2TEX_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Timeout per model pass in seconds.
    #[arg(long, global = true, env = "NOTES2TEX_UPSTREAM_TIMEOUT", default_value_t = 120)]
    upstream_timeout: u64,

    /// Per-sentence similarity needed to count a sentence as matched.
    #[arg(long, global = true, env = "NOTES2TEX_SENTENCE_FLOOR", default_value_t = 0.90)]
    sentence_floor: f64,

    /// Margin above a threshold that still downgrades to accept-with-warnings.
    #[arg(long, global = true, env = "NOTES2TEX_WARN_MARGIN", default_value_t = 0.01)]
    warn_margin: f64,

    /// Readable-mode thresholds as SENTENCE,CHARACTER (e.g. 0.8,0.85).
    #[arg(long, global = true, env = "NOTES2TEX_READABLE_THRESHOLDS")]
    readable_thresholds: Option<String>,

    /// Maximum suggestions per decision.
    #[arg(long, global = true, env = "NOTES2TEX_MAX_SUGGESTIONS", default_value_t = 8)]
    max_suggestions: usize,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Auto,
    #[value(alias = "strict")]
    Faithful,
    #[value(alias = "book")]
    Readable,
}

impl From<ModeArg> for ModeSelection {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Auto => ModeSelection::Auto,
            ModeArg::Faithful => ModeSelection::Fixed(Mode::Faithful),
            ModeArg::Readable => ModeSelection::Fixed(Mode::Readable),
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LanguageArg {
    En,
    Ru,
}

impl From<LanguageArg> for Language {
    fn from(v: LanguageArg) -> Self {
        match v {
            LanguageArg::En => Language::En,
            LanguageArg::Ru => Language::Ru,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let batch = matches!(cli.command, Command::Batch { .. });
    let show_progress = batch && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli.policy, progress_cb)?;

    match cli.command {
        Command::Run { ref job } => {
            let output = process_job(job, &FileCollaborator::new(), &config)
                .await
                .with_context(|| format!("Failed to process job {}", job.display()))?;
            report(&cli, &job.display().to_string(), &output.decision)?;
            Ok(exit_code([output.decision.verdict]))
        }

        Command::Batch { ref paths } => {
            let dirs = expand_batch(paths).await?;
            let outcomes = process_batch(dirs, Arc::new(FileCollaborator::new()), &config).await;

            let mut verdicts = Vec::new();
            let mut failed = false;
            for outcome in &outcomes {
                match outcome.result {
                    Ok(ref output) => {
                        verdicts.push(output.decision.verdict);
                        if cli.json {
                            report(&cli, &outcome.job, &output.decision)?;
                        }
                    }
                    Err(ref e) => {
                        failed = true;
                        if cli.json {
                            println!(
                                "{}",
                                serde_json::to_string(e).context("Failed to serialise job error")?
                            );
                        } else if !show_progress && !cli.quiet {
                            eprintln!("{} {}", red("✗"), e);
                        }
                    }
                }
                if !cli.json && !show_progress && !cli.quiet {
                    if let Ok(ref output) = outcome.result {
                        eprintln!(
                            "{} {:<32} {}",
                            verdict_mark(output.decision.verdict),
                            outcome.job,
                            dim(&output.decision.verdict.to_string())
                        );
                    }
                }
            }
            if failed {
                return Ok(ExitCode::from(1));
            }
            Ok(exit_code(verdicts))
        }

        Command::Check {
            ref raw,
            ref baseline,
            ref context,
            ref output,
        } => {
            let raw_text = tokio::fs::read_to_string(raw)
                .await
                .with_context(|| format!("Failed to read raw output from {}", raw.display()))?;
            let baseline_text = tokio::fs::read_to_string(baseline)
                .await
                .with_context(|| format!("Failed to read transcript from {}", baseline.display()))?;
            let context = match context {
                Some(dir) => {
                    load_job(dir)
                        .await
                        .with_context(|| format!("Failed to load job context from {}", dir.display()))?
                        .context
                }
                None => Default::default(),
            };

            let result = run_text(&raw_text, &baseline_text, &context, &config)
                .context("Pipeline failed")?;

            if let Some(path) = output {
                tokio::fs::write(path, &result.candidate.source)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            report(&cli, &raw.display().to_string(), &result.decision)?;
            Ok(exit_code([result.decision.verdict]))
        }

        Command::Classify { ref transcript } => {
            let text = tokio::fs::read_to_string(transcript)
                .await
                .with_context(|| format!("Failed to read {}", transcript.display()))?;
            let language = config.language.unwrap_or_else(|| Language::detect(&text));
            let rec = recommend_mode(&text, language);
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&rec).context("Failed to serialise recommendation")?
                );
            } else {
                println!("Language:     {}", language);
                println!("Mode:         {}", rec.mode);
                println!("Confidence:   {:.2}", rec.confidence);
                if let Some(blocker) = rec.blocked_by {
                    println!("Blocked by:   {:?}", blocker);
                }
                for reason in &rec.reasons {
                    println!("  - {}", reason);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &PolicyArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .mode(args.mode.into())
        .concurrency(args.concurrency)
        .upstream_timeout_secs(args.upstream_timeout)
        .sentence_floor(args.sentence_floor)
        .warn_margin(args.warn_margin)
        .max_suggestions(args.max_suggestions);

    if let Some(language) = args.language {
        builder = builder.language(language.into());
    }
    if let Some(ref s) = args.readable_thresholds {
        builder = builder.readable_thresholds(parse_thresholds(s)?);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `SENTENCE,CHARACTER` into `FidelityThresholds`.
fn parse_thresholds(s: &str) -> Result<FidelityThresholds> {
    let (sentence, character) = s
        .split_once(',')
        .with_context(|| format!("Expected SENTENCE,CHARACTER, got '{s}'"))?;
    let sentence: f64 = sentence
        .trim()
        .parse()
        .context("Invalid sentence threshold")?;
    let character: f64 = character
        .trim()
        .parse()
        .context("Invalid character threshold")?;
    for v in [sentence, character] {
        if !(0.0..=1.0).contains(&v) {
            anyhow::bail!("Thresholds must lie in 0.0..=1.0 (got {})", v);
        }
    }
    Ok(FidelityThresholds::new(sentence, character))
}

/// A single root without logs/ of its own stands for its job subdirectories.
async fn expand_batch(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if let [root] = paths {
        let is_job = tokio::fs::metadata(root.join("logs"))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_job {
            let dirs = discover_jobs(root)
                .await
                .with_context(|| format!("Failed to list jobs under {}", root.display()))?;
            if dirs.is_empty() {
                anyhow::bail!("No job directories under {}", root.display());
            }
            return Ok(dirs);
        }
    }
    Ok(paths.to_vec())
}

fn report(cli: &Cli, name: &str, decision: &Decision) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(decision).context("Failed to serialise decision")?
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    let sim = &decision.similarity;
    eprintln!(
        "{} {}  {}  {} / {}",
        verdict_mark(decision.verdict),
        bold(name),
        decision.verdict,
        decision.mode,
        decision.language,
    );
    eprintln!(
        "   sentence {:.3}  character {:.3}  {}",
        sim.sentence_score,
        sim.char_score,
        dim(&format!(
            "{}/{} sentences matched",
            sim.matched_sentences, sim.baseline_sentences
        )),
    );
    for issue in &decision.issues {
        eprintln!("   {} {}", dim("issue"), issue);
    }
    for suggestion in &decision.suggestions {
        eprintln!("   {} {}", cyan("→"), suggestion);
    }
    Ok(())
}

fn exit_code(verdicts: impl IntoIterator<Item = Verdict>) -> ExitCode {
    if verdicts.into_iter().any(|v| v == Verdict::Reject) {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
