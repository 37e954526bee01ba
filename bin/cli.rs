use clap::{Parser, ValueEnum};
use serde_json::json;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use bugreport_inspector_library::file_loader::{get_file_description, load_bugreport_file};
use bugreport_inspector_library::parse_bugreports_concurrently;
use bugreport_inspector_library::parsers::ParserType;
use bugreport_inspector_library::progress::ProgressTracker;
use bugreport_inspector_library::{Bugreport, InspectorConfig};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

/// A command-line tool to parse Android bugreports and cross-reference their logs and stack traces.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The bugreport(s) to process, plain text or the .zip from `adb bugreport`
    #[arg(short, long, num_args = 1.., required = true)]
    file_path: Vec<PathBuf>,

    /// The section parser(s) to run. Defaults to all of them.
    #[arg(long, value_enum, num_args = 1..)]
    parser_type: Vec<ParserType>,

    /// JSON file with the inspection settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output_format: OutputFormat,

    /// Show progress bars
    #[arg(short, long)]
    progress: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading inspector configuration from {}", path.display());
            InspectorConfig::from_file(path)?
        }
        None => InspectorConfig::default(),
    };
    let parser_types = if args.parser_type.is_empty() {
        ParserType::all()
    } else {
        args.parser_type.clone()
    };

    let tracker = ProgressTracker::new(args.progress);
    let start_time = Instant::now();

    let mut inputs: Vec<(String, Arc<[u8]>)> = Vec::new();
    for path in &args.file_path {
        let name = path.display().to_string();
        let pb = tracker.create_load_progress(&name);
        match load_bugreport_file(path) {
            Ok((content, is_zip)) => {
                ProgressTracker::finish_and_clear(pb);
                inputs.push((get_file_description(&name, is_zip), content));
            }
            Err(e) => {
                ProgressTracker::finish_and_clear(pb);
                warn!("Skipping {}: {}", name, e);
            }
        }
    }

    info!(
        "Parsing {} bugreport(s) with {:?} parsers concurrently...",
        inputs.len(),
        parser_types
    );

    let pb = tracker.create_parse_progress(inputs.len());
    let results = parse_bugreports_concurrently(inputs, &parser_types, &config);
    ProgressTracker::set_position(&pb, results.len() as u64);
    ProgressTracker::finish_with_message(pb, "✅ Parsing complete");

    info!("All bugreports finished in {:?}", start_time.elapsed());

    let mut failures = 0;
    for (name, result, duration) in results {
        match result {
            Ok(report) => match args.output_format {
                OutputFormat::Json => print_json(&name, &report, duration)?,
                OutputFormat::Text => print_summary(&name, &report, duration),
            },
            Err(e) => {
                failures += 1;
                eprintln!("Error: {}: {}", name, e);
            }
        }
    }

    if failures > 0 {
        return Err(format!("{} bugreport(s) failed to parse", failures).into());
    }
    Ok(())
}

fn print_json(name: &str, report: &Bugreport, duration: Duration) -> Result<(), Box<dyn Error + Send + Sync>> {
    let output = json!({
        "file": name,
        "duration_ms": duration.as_millis() as u64,
        "bugreport": report,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_summary(name: &str, report: &Bugreport, duration: Duration) {
    println!("\n--- {} (took: {:.2?}) ---", name, duration);
    println!("Build:      {}", report.build_id.as_deref().unwrap_or("unknown"));
    if let Some(start) = report.start_time {
        println!("Started:    {}", start);
    }
    if let Some(end) = report.end_time {
        println!("Ended:      {}", end);
    }

    let handled = report.sections.iter().filter(|s| s.handled).count();
    println!("Sections:   {} ({} parsed)", report.sections.len(), handled);

    let log_len = |log: &Option<bugreport_inspector_library::parsers::Logcat>| log.as_ref().map_or(0, |l| l.len());
    println!(
        "Logcat:     {} lines ({} system, {} event)",
        log_len(&report.logcat),
        log_len(&report.system_log),
        log_len(&report.event_log)
    );
    println!("Properties: {}", report.system_properties.len());
    println!("Processes:  {}", report.all_known_processes.len());

    match &report.anr {
        Some(anr) => {
            let pid = anr.pid.map_or_else(|| "?".to_string(), |p| p.to_string());
            println!("ANR:        {} (pid {})", anr.process_name, pid);
            if let Some(reason) = &anr.reason {
                println!("  Reason:   {}", reason);
            }
            if let Some(traces) = &anr.vm_traces {
                for pid in &traces.deadlocked_pids {
                    println!("  🔒 Deadlock in pid {}", pid);
                }
                for process in &traces.interesting_processes {
                    println!("  {} [{}]", process.cmd_line, process.pid);
                    for thread in &process.threads {
                        let state = thread.vm_state.as_deref().unwrap_or("");
                        println!("    \"{}\" tid={} {}", thread.name, thread.tid, state);
                    }
                }
            }
        }
        None => println!("ANR:        none"),
    }

    let interesting = report.interesting_log_lines();
    if !interesting.is_empty() {
        println!("Interesting log lines:");
        for line in interesting {
            println!("  {:>6}  {}", line.lineno, line.raw_text);
        }
    }
}
