//! CLI entry point for `msgarchive`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use msgarchive::config::Config;
use msgarchive::context::{load_handle_names, RunContext};
use msgarchive::index::builder::{self, YearIndex};

#[derive(Parser)]
#[command(
    name = "msgarchive",
    version,
    about = "Extract conversations from Messages .ichat archives, grouped by year"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// First year to keep
    #[arg(value_name = "START_YEAR")]
    start_year: Option<i32>,

    /// Last year to keep (defaults to the configured end year)
    #[arg(value_name = "END_YEAR")]
    end_year: Option<i32>,

    /// Messages directory containing Archive/ and Attachments/
    #[arg(short, long, global = true, env = "MSGARCHIVE_MESSAGES_DIR")]
    messages_dir: Option<PathBuf>,

    /// External attachment library to search by file name
    #[arg(short, long, global = true)]
    external_library: Option<PathBuf>,

    /// Directory receiving copies of external attachments
    #[arg(long, global = true)]
    copy_dir: Option<PathBuf>,

    /// JSON file mapping identities to display names
    #[arg(long, global = true)]
    handles: Option<PathBuf>,

    /// Write the merged configuration back to the config file
    #[arg(long, global = true)]
    save_config: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the archive and print a per-year summary
    Scan {
        #[arg(long)]
        json: bool,
    },
    /// Read the archive and write one file per year
    Export {
        #[arg(short, long, default_value = "json")]
        format: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = msgarchive::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config);

    // Command-line values win over the config file.
    if cli.start_year.is_some() {
        config.years.start_year = cli.start_year;
        config.years.end_year = cli.end_year.or(config.years.end_year);
    }
    if let Some(dir) = cli.messages_dir {
        config.paths.messages_dir = Some(dir);
    }
    if let Some(lib) = cli.external_library {
        config.paths.external_library = Some(lib);
    }
    if let Some(dir) = cli.copy_dir {
        config.paths.copy_dir = Some(dir);
    }
    if let Some(handles) = cli.handles {
        config.paths.handles_file = Some(handles);
    }
    if cli.save_config {
        msgarchive::config::save_config(&config)?;
    }
    tracing::debug!(?config, "Configuration");

    match cli.command {
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
        Some(Commands::Export { format, output }) => cmd_export(&config, &format, &output),
        Some(Commands::Scan { json }) => cmd_scan(&config, json),
        None => cmd_scan(&config, false),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_file = msgarchive::config::log_file_path(config);
    let log_dir = msgarchive::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_name = log_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "msgarchive.log".into());
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "msgarchive", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Build the run context and walk the archive with a progress bar.
fn read_archive(config: &Config) -> anyhow::Result<(YearIndex, RunContext, std::time::Duration)> {
    let archive_root = config
        .archive_root()
        .ok_or_else(|| anyhow::anyhow!("No messages directory given (use -m or set paths.messages_dir)"))?;
    if !archive_root.is_dir() {
        anyhow::bail!("Archive directory not found: {}", archive_root.display());
    }
    let resolver = config
        .attachment_resolver()
        .ok_or_else(|| anyhow::anyhow!("No messages directory given"))?;

    let mut options = config.extract_options();
    if let Some(handles) = &config.paths.handles_file {
        options.handle_names = load_handle_names(handles)?;
    }
    let mut run = RunContext::new(options, resolver);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Reading archive [{bar:40.cyan/blue}] {pos}/{len} files")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let on_progress = |current: usize, total: usize| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
    };

    let start = Instant::now();
    let index = builder::build_year_index(
        &archive_root,
        &mut run,
        &config.walk_options(),
        Some(&on_progress),
    )?;
    pb.finish_and_clear();

    Ok((index, run, start.elapsed()))
}

/// Read the archive and print a per-year summary.
fn cmd_scan(config: &Config, json: bool) -> anyhow::Result<()> {
    let (index, run, elapsed) = read_archive(config)?;
    if json {
        print_summary_json(&index, &run, elapsed)
    } else {
        print_summary_table(&index, &run, elapsed);
        Ok(())
    }
}

/// Read the archive and write one export file per year.
fn cmd_export(config: &Config, format: &str, output: &Path) -> anyhow::Result<()> {
    let exporter: fn(i32, &[msgarchive::model::message::Message], &Path) -> anyhow::Result<PathBuf> =
        match format {
            "json" => msgarchive::export::json::export_year_json,
            "txt" | "text" => msgarchive::export::text::export_year_text,
            _ => anyhow::bail!("Unknown export format '{}'. Supported: json, txt", format),
        };

    let (index, run, elapsed) = read_archive(config)?;
    std::fs::create_dir_all(output)?;

    for (year, messages) in &index.years {
        let path = exporter(*year, messages, output)?;
        println!("  {year}: {} message(s) -> {}", messages.len(), path.display());
    }
    print_summary_table(&index, &run, elapsed);
    Ok(())
}

/// Print the per-year summary as a human-readable table.
fn print_summary_table(index: &YearIndex, run: &RunContext, elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    let stats = run.attachments.stats();

    println!();
    println!("  {:<6} {:>10} {:>12}", "Year", "Messages", "Attachments");
    println!("  {}", "-".repeat(30));
    for (year, messages) in &index.years {
        let attachments: usize = messages.iter().map(|m| m.attachments.len()).sum();
        println!("  {:<6} {:>10} {:>12}", year, messages.len(), attachments);
    }
    println!();
    println!("  {:<25} {}", "Archive files read", index.files_read);
    println!("  {:<25} {}", "Archive files skipped", index.failures.len());
    println!("  {:<25} {}", "Messages", index.message_count());
    println!("  {:<25} {}", "Attachments found", stats.local);
    println!(
        "  {:<25} {} ({})",
        "Attachments copied",
        stats.copied,
        format_size(stats.bytes_copied, BINARY)
    );
    println!("  {:<25} {}", "Copies reused", stats.reused);
    println!("  {:<25} {}", "Attachments missing", stats.unresolved);
    println!("  {:<25} {:.2?}", "Elapsed", elapsed);

    if !index.failures.is_empty() {
        println!();
        for failure in &index.failures {
            println!("  skipped {}: {}", failure.path.display(), failure.error);
        }
    }
    println!();
}

/// Print the per-year summary as JSON.
fn print_summary_json(
    index: &YearIndex,
    run: &RunContext,
    elapsed: std::time::Duration,
) -> anyhow::Result<()> {
    let stats = run.attachments.stats();
    let years: Vec<serde_json::Value> = index
        .years
        .iter()
        .map(|(year, messages)| {
            serde_json::json!({
                "year": year,
                "messages": messages.len(),
                "attachments": messages.iter().map(|m| m.attachments.len()).sum::<usize>(),
            })
        })
        .collect();
    let failures: Vec<serde_json::Value> = index
        .failures
        .iter()
        .map(|f| {
            serde_json::json!({
                "file": f.path.to_string_lossy(),
                "error": f.error.to_string(),
            })
        })
        .collect();

    let summary = serde_json::json!({
        "files_read": index.files_read,
        "message_count": index.message_count(),
        "years": years,
        "failures": failures,
        "attachments": {
            "local": stats.local,
            "copied": stats.copied,
            "reused": stats.reused,
            "unresolved": stats.unresolved,
            "bytes_copied": stats.bytes_copied,
        },
        "elapsed_ms": elapsed.as_millis(),
    });

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
