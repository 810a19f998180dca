//! Reverb CLI
//!
//! Replays recorded HTTP sessions against a new service build or a
//! contract-derived template engine and reports field-level compatibility.
//!
//! Usage:
//!   reverb replay session.json --contract api.yaml
//!   reverb replay session.json --target http://localhost:8080 --strict
//!   reverb tag session.json --add checkout,regression
//!   reverb session list ./session-logs

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use reverb::config::VerifierConfig;
use reverb::contract::{configure_from_contract, load_contract, ImportStrategy};
use reverb::replay::filter::SessionFilter;
use reverb::replay::{ReplayEngine, ReplayOptions, TemplateEngine};
use reverb::report::{build_report, Report, Verdict};
use reverb::route::RouteResolver;
use reverb::session::{list_sessions, Session};
use reverb::tolerance::ComparisonMode;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Reverb - replay recorded HTTP sessions and verify compatibility
#[derive(Parser, Debug)]
#[command(name = "reverb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded session and report compatibility
    Replay {
        /// Path to the recorded session file (JSON)
        session_file: PathBuf,

        /// Contract file (JSON/YAML) providing template routes
        #[arg(long)]
        contract: Option<PathBuf>,

        /// Base URL of the service under verification
        #[arg(long)]
        target: Option<String>,

        /// Write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Report format on stdout
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Effective-compatibility score gate (0-100)
        #[arg(long)]
        threshold: Option<f64>,

        /// Disable template routes; always replay against the target
        #[arg(long)]
        no_dynamic: bool,

        /// Configuration file (JSON/YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Exit nonzero when the score falls below the threshold
        #[arg(long)]
        fail_on_threshold: bool,

        /// Zero all tolerances; any deviation fails
        #[arg(long, conflicts_with = "tolerant")]
        strict: bool,

        /// Force-enable all tolerance features with defaults
        #[arg(long)]
        tolerant: bool,

        /// Compile all templates before replay
        #[arg(long)]
        preload_templates: bool,

        /// Include resolver/render metrics in the report
        #[arg(long)]
        performance: bool,

        /// Only replay interactions with these methods
        #[arg(long, value_delimiter = ',')]
        filter_methods: Vec<String>,

        /// Only replay interactions whose path matches (glob or substring)
        #[arg(long, value_delimiter = ',')]
        filter_routes: Vec<String>,

        /// Only replay interactions carrying one of these tags
        #[arg(long, value_delimiter = ',')]
        filter_tags: Vec<String>,

        /// Only replay sessions carrying one of these tags
        #[arg(long, value_delimiter = ',')]
        filter_session_tags: Vec<String>,
    },

    /// Add tags to a session file
    Tag {
        /// Path to the session file (JSON)
        session_file: PathBuf,

        /// Tags to add (comma-separated)
        #[arg(long, required = true, value_delimiter = ',')]
        add: Vec<String>,

        /// Tag a single interaction by index instead of the session
        #[arg(long)]
        interaction: Option<usize>,
    },

    /// Inspect recorded sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// List session files in a directory
    List { dir: PathBuf },
    /// Show one session's metadata and interactions
    Show { file: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let outcome = match cli.command {
        command @ Commands::Replay { .. } => run_replay(command).await,
        Commands::Tag {
            session_file,
            add,
            interaction,
        } => run_tag(&session_file, &add, interaction),
        Commands::Session { action } => run_session(action),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{RED}Error:{RESET} {e:#}");
            std::process::exit(1);
        }
    }
}

#[allow(clippy::too_many_lines)]
async fn run_replay(command: Commands) -> anyhow::Result<i32> {
    let Commands::Replay {
        session_file,
        contract,
        target,
        output,
        format,
        threshold,
        no_dynamic,
        config,
        fail_on_threshold,
        strict,
        tolerant,
        preload_templates,
        performance,
        filter_methods,
        filter_routes,
        filter_tags,
        filter_session_tags,
    } = command
    else {
        anyhow::bail!("internal: run_replay called with a non-replay command");
    };

    let config = match &config {
        Some(path) => VerifierConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VerifierConfig::default(),
    };

    let mode = if strict {
        ComparisonMode::Strict
    } else if tolerant {
        ComparisonMode::Tolerant
    } else {
        config.mode
    };
    let threshold = threshold.unwrap_or(config.threshold);
    if !(0.0..=100.0).contains(&threshold) {
        anyhow::bail!("--threshold must be within 0-100, got {threshold}");
    }

    let session = Session::from_file(&session_file)
        .with_context(|| format!("loading session {}", session_file.display()))?;

    let filter = SessionFilter {
        methods: filter_methods,
        routes: filter_routes,
        tags: filter_tags,
        session_tags: filter_session_tags,
    };
    let options = ReplayOptions {
        mode,
        use_dynamic_responses: !no_dynamic,
        target_base_url: target.or_else(|| config.target_base_url.clone()),
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        preload_templates,
        treat_added_headers_as_breaking: config.treat_added_headers_as_breaking,
        filter: (!filter.is_empty()).then_some(filter),
    };

    let mut engine = ReplayEngine::new(options, config.tolerances.clone())?;
    let contract_file = contract.as_ref().map(|p| p.display().to_string());
    if let Some(contract_path) = &contract {
        let document = load_contract(contract_path)
            .with_context(|| format!("loading contract {}", contract_path.display()))?;
        let strategy = match config.prefer_status {
            Some(status) => ImportStrategy::PreferStatus(status),
            None => ImportStrategy::FirstSuccess,
        };
        let mut resolver = RouteResolver::new();
        let routes = configure_from_contract(&mut resolver, &document, strategy)?;
        println!(
            "{DIM}Loaded {routes} template route(s) from {}{RESET}",
            contract_path.display()
        );
        engine = engine.with_template_provider(TemplateEngine::new(resolver));
    }

    let result = engine.replay_session(&session).await?;
    let metrics = performance.then(|| engine.template_metrics()).flatten();
    let report = build_report(
        &session.session_id,
        result,
        contract_file,
        metrics,
        config.treat_added_headers_as_breaking,
    );

    if let Some(output_path) = &output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(output_path, json)
            .with_context(|| format!("writing report to {}", output_path.display()))?;
        println!("{DIM}Report written to {}{RESET}", output_path.display());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text_report(&report),
    }

    let summary = &report.result.summary;
    let strict_deviation = mode == ComparisonMode::Strict
        && (summary.compatible < summary.total || summary.errors > 0);
    let below_threshold =
        fail_on_threshold && summary.effective_compatibility_score < threshold;
    Ok(if strict_deviation || below_threshold { 1 } else { 0 })
}

fn run_tag(
    session_file: &PathBuf,
    tags: &[String],
    interaction: Option<usize>,
) -> anyhow::Result<i32> {
    let mut session = Session::from_file(session_file)
        .with_context(|| format!("loading session {}", session_file.display()))?;
    session.add_tags(tags, interaction)?;
    session.to_file(session_file)?;
    match interaction {
        Some(index) => println!(
            "{GREEN}Tagged interaction {index} of {} with {:?}{RESET}",
            session.session_id, tags
        ),
        None => println!(
            "{GREEN}Tagged session {} with {:?}{RESET}",
            session.session_id, tags
        ),
    }
    Ok(0)
}

fn run_session(action: SessionAction) -> anyhow::Result<i32> {
    match action {
        SessionAction::List { dir } => {
            let listings = list_sessions(&dir)
                .with_context(|| format!("listing sessions in {}", dir.display()))?;
            if listings.is_empty() {
                println!("{YELLOW}No session files found in {}{RESET}", dir.display());
                return Ok(0);
            }
            println!("{BOLD}{:<32} {:>12}  {:<24} TAGS{RESET}", "SESSION", "INTERACTIONS", "RECORDED");
            for listing in listings {
                println!(
                    "{:<32} {:>12}  {:<24} {}",
                    listing.session_id,
                    listing.interactions,
                    listing.timestamp,
                    listing.tags.join(",")
                );
            }
        }
        SessionAction::Show { file } => {
            let session = Session::from_file(&file)
                .with_context(|| format!("loading session {}", file.display()))?;
            println!("{BOLD}Session:{RESET} {}", session.session_id);
            println!("Recorded:    {}", session.timestamp);
            if let Some(environment) = &session.metadata.environment {
                println!("Environment: {environment}");
            }
            if !session.metadata.description.is_empty() {
                println!("Description: {}", session.metadata.description);
            }
            if !session.metadata.tags.is_empty() {
                println!("Tags:        {}", session.metadata.tags.join(", "));
            }
            println!();
            for (index, interaction) in session.interactions.iter().enumerate() {
                println!(
                    "{DIM}[{index:>3}]{RESET} {} {} -> {} {DIM}({}){RESET}",
                    interaction.request.method,
                    interaction.request.path,
                    interaction.response.status_code,
                    &interaction.request_hash[..12.min(interaction.request_hash.len())],
                );
            }
        }
    }
    Ok(0)
}

fn print_text_report(report: &Report) {
    let summary = &report.result.summary;

    println!();
    println!("{BOLD}{CYAN}Reverb Compatibility Report{RESET}");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Session:  {}", report.session_id);
    println!("Mode:     {}", report.result.comparison_mode);
    if let Some(contract) = &report.contract_file {
        println!("Contract: {contract}");
    }
    if let Some(stats) = &report.result.filtered_stats {
        println!(
            "Filter:   {} of {} interaction(s) selected",
            stats.filtered_count, stats.original_count
        );
    }
    println!();

    // Per-endpoint table
    if !report.endpoints.is_empty() {
        println!(
            "{BOLD}{:<36} {:>12} {:>7} {:>9} {:>9}  VERDICT{RESET}",
            "ENDPOINT", "STATUS", "DIFFS", "TOLERATED", "EFFECTIVE"
        );
        for row in &report.endpoints {
            let color = match row.verdict {
                Verdict::Compatible => GREEN,
                Verdict::Tolerable => YELLOW,
                Verdict::Incompatible | Verdict::Error => RED,
            };
            println!(
                "{:<36} {:>12} {:>7} {:>9} {:>9}  {color}{}{RESET}",
                row.endpoint,
                row.status_delta,
                row.total_changes,
                row.tolerated_changes,
                row.effective_changes,
                row.verdict.as_str()
            );
        }
        println!();
    }

    if !report.incompatibilities.is_empty() {
        println!("{BOLD}{RED}Incompatibilities{RESET}");
        for item in &report.incompatibilities {
            match &item.path {
                Some(path) => println!("  {RED}✗{RESET} {} {DIM}{path}{RESET}: {}", item.endpoint, item.reason),
                None => println!("  {RED}✗{RESET} {}: {}", item.endpoint, item.reason),
            }
        }
        println!();
    }

    if !report.tolerated_changes.is_empty() {
        println!("{BOLD}{YELLOW}Tolerated changes{RESET}");
        for item in &report.tolerated_changes {
            println!(
                "  {YELLOW}~{RESET} {} {DIM}{}{RESET}: {} -> {}",
                item.endpoint, item.path, item.recorded, item.replayed
            );
        }
        println!();
    }

    if let Some(metrics) = &report.performance {
        println!("{BOLD}Performance{RESET}");
        println!(
            "  route cache: {} hit(s), {} miss(es)",
            metrics.cache_hits, metrics.cache_misses
        );
        println!(
            "  templates:   {} compilation(s), {} render(s), {:.2} ms total ({:.3} ms avg)",
            metrics.template_compilations,
            metrics.template_renders,
            metrics.total_render_time_ms,
            metrics.avg_render_time_ms
        );
        println!();
    }

    let score_color = if summary.effective_compatibility_score >= 100.0 {
        GREEN
    } else if summary.effective_compatibility_score >= 80.0 {
        YELLOW
    } else {
        RED
    };
    println!(
        "{BOLD}Summary:{RESET} {} total, {GREEN}{} compatible{RESET}, {RED}{} incompatible{RESET}, {} error(s)",
        summary.total, summary.compatible, summary.incompatible, summary.errors
    );
    println!(
        "{BOLD}Changes:{RESET} {} total, {} tolerated, {} effective",
        summary.total_changes, summary.tolerated_changes, summary.effective_changes
    );
    println!(
        "{BOLD}Score:{RESET}   {score_color}{:.1}%{RESET} (effective {score_color}{:.1}%{RESET})",
        summary.compatibility_score, summary.effective_compatibility_score
    );
}
