use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use imgseo_core::audit::{AuditReport, audit_site};
use imgseo_core::config::{SiteConfig, load_config};
use imgseo_core::materialize::{DryRunMaterializer, HttpMaterializer, Materializer};
use imgseo_core::orchestrator::{Orchestrator, RunOptions, RunSummary};
use imgseo_core::rewrite::ImageStatus;
use imgseo_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_config, resolve_paths,
};
use log::LevelFilter;

#[derive(Debug, Parser)]
#[command(
    name = "imgseo",
    version,
    about = "Rename and localize page images under keyword-derived names"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Site root holding the HTML files"
    )]
    base_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, conflicts_with = "quiet", help = "Log per-image detail")]
    verbose: bool,
    #[arg(short, long, global = true, help = "Only log warnings and errors")]
    quiet: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    base_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            base_dir: cli.base_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Write the starter configuration")]
    Init(InitArgs),
    #[command(about = "Materialize images and rewrite every configured page")]
    Run(RunArgs),
    #[command(about = "Report orphaned, missing and duplicate images")]
    Audit(AuditArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, help = "Plan only: no downloads, copies or page writes")]
    dry_run: bool,
    #[arg(long, help = "Print a unified diff of every changed page")]
    diff: bool,
    #[arg(long, help = "Exit non-zero when any image failed")]
    strict: bool,
    #[arg(long, help = "Print the run summary as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[arg(long, help = "Print the audit report as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Run(args)) => run_site(&runtime, args),
        Some(Commands::Audit(args)) => run_audit(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let wrote = init_config(&paths, args.force)?;

    println!("Initialized imgseo configuration");
    println!("base_dir: {}", normalize_path(&paths.base_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("wrote_config: {}", format_flag(wrote));
    if !wrote {
        println!("hint: config already exists, pass --force to overwrite");
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_site(runtime: &RuntimeOptions, args: RunArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let strict = args.strict || config.site.strict;

    let http;
    let materializer: &dyn Materializer = if args.dry_run {
        &DryRunMaterializer
    } else {
        http = HttpMaterializer::new(&config.http_settings())?;
        &http
    };
    let options = RunOptions {
        dry_run: args.dry_run,
        capture_diff: args.diff,
    };
    let summary = Orchestrator::new(&paths.base_dir, &config, materializer, options).run()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_run_summary(&paths, &config, &summary);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    if strict && summary.has_failures() {
        bail!(
            "{} image(s) failed and strict mode is enabled",
            summary.totals().images_failed
        );
    }
    Ok(())
}

fn run_audit(runtime: &RuntimeOptions, args: AuditArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let report = audit_site(&paths.base_dir, &config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_audit_report(&paths, &report);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn print_run_summary(paths: &ResolvedPaths, config: &SiteConfig, summary: &RunSummary) {
    let totals = summary.totals();
    println!("image run{}", if summary.dry_run { " (dry run)" } else { "" });
    println!("base_dir: {}", normalize_path(&paths.base_dir));
    println!(
        "images_dir: {}",
        normalize_path(&config.images_path(&paths.base_dir))
    );
    println!("pages_configured: {}", totals.pages_configured);
    println!("pages_processed: {}", totals.pages_processed);
    println!("pages_written: {}", totals.pages_written);
    println!("pages_skipped: {}", totals.pages_skipped);
    println!("images_found: {}", totals.images_found);
    println!("images_materialized: {}", totals.images_materialized);
    println!(
        "images_already_canonical: {}",
        totals.images_already_canonical
    );
    println!("images_skipped: {}", totals.images_skipped);
    println!("images_failed: {}", totals.images_failed);

    if !summary.skipped_pages.is_empty() {
        println!("skipped_pages:");
        for skip in &summary.skipped_pages {
            println!("  - {skip}");
        }
    }

    let failures = summary
        .pages
        .iter()
        .flat_map(|page| {
            page.outcomes.iter().filter_map(move |outcome| match &outcome.status {
                ImageStatus::Failed { error } => Some((page, outcome.position, error)),
                _ => None,
            })
        })
        .collect::<Vec<_>>();
    if !failures.is_empty() {
        println!("failures:");
        for (page, position, error) in failures {
            println!(
                "  - {} image {}: {error}",
                normalize_path(&page.file),
                position + 1
            );
        }
    }

    for page in &summary.pages {
        if let Some(diff) = page.diff.as_deref() {
            println!();
            print!("{diff}");
        }
    }
}

fn print_audit_report(paths: &ResolvedPaths, report: &AuditReport) {
    println!("image audit");
    println!("base_dir: {}", normalize_path(&paths.base_dir));
    println!("images_dir: {}", normalize_path(&report.images_dir));
    println!("pages_scanned: {}", report.pages_scanned);
    println!("total_images: {}", report.total_images);
    println!("orphans: {}", report.orphans.len());
    for orphan in &report.orphans {
        println!("  - {}", normalize_path(orphan));
    }
    println!("missing: {}", report.missing.len());
    for missing in &report.missing {
        println!("  - {} -> {}", missing.page, missing.src);
    }
    println!("duplicate_groups: {}", report.duplicates.len());
    for group in &report.duplicates {
        let names = group
            .iter()
            .map(|path| normalize_path(path))
            .collect::<Vec<_>>();
        println!("  - {}", names.join(", "));
    }
    println!("clean: {}", format_flag(report.is_clean()));
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        base_dir: runtime.base_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let site_env = initial.base_dir.join(".env");
    if site_env.exists() {
        let _ = dotenvy::from_path_override(&site_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
