mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use zsync::error::format_bytes;
use zsync::sync::JsonObserver;
use zsync::{Config, EventDispatcher, Observer, Options, StatsObserver, Zsync, ZsyncEvent, ZsyncStats};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().as_str()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = Config::load()?;
    let options = options(&cli, config);

    let mut events = EventDispatcher::new();
    let progress = cli.show_progress().then(|| Arc::new(ProgressObserver::new()));
    if let Some(progress) = &progress {
        events.add(progress.clone());
    }
    if cli.json {
        events.add(Arc::new(JsonObserver::new(cli.verbose > 0)));
    }
    let stats = cli.stats.then(|| Arc::new(StatsObserver::new()));
    if let Some(stats) = &stats {
        events.add(stats.clone());
    }

    let result = Zsync::new(&options.http).and_then(|zsync| zsync.zsync(&cli.uri, &options, &events));
    if let Some(progress) = &progress {
        progress.finish();
    }
    let path = result?;

    if !cli.quiet && !cli.json {
        println!("\n{} {}\n", "✓ Wrote".green().bold(), path.display());
    }

    if let Some(stats) = stats {
        let stats = stats.stats();
        if cli.json {
            println!("{}", serde_json::to_string(&stats)?);
        } else {
            print_stats(&stats);
        }
    }

    Ok(())
}

/// Merge config file settings with command line overrides
fn options(cli: &Cli, config: Config) -> Options {
    let mut http = config.http;
    if let Some(timeout) = cli.timeout {
        http.timeout_secs = Some(timeout);
    }

    let mut credentials = config.credentials;
    for (host, creds) in &cli.auth {
        credentials.insert(host.clone(), creds.clone());
    }

    Options {
        inputs: cli.inputs.clone(),
        output: cli.output.clone(),
        url: cli.url.clone(),
        credentials,
        http,
    }
}

fn print_stats(stats: &ZsyncStats) {
    println!("  Bytes read:        {}", format_bytes(stats.total_bytes_read).blue());
    for (path, bytes) in &stats.bytes_written_by_input_file {
        println!(
            "  Matched from seed: {} ({})",
            format_bytes(*bytes).green(),
            path.display()
        );
    }
    println!(
        "  Control file:      {}",
        format_bytes(stats.bytes_downloaded_for_control_file).cyan()
    );
    println!(
        "  Downloaded:        {} in {} requests",
        format_bytes(stats.bytes_downloaded_from_remote_file).cyan(),
        stats.range_requests.len()
    );
    println!("  Bytes written:     {}", format_bytes(stats.total_bytes_written).cyan());
    println!(
        "  Duration:          {}",
        format_duration(Duration::from_millis(stats.total_elapsed_ms)).cyan()
    );
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        if mins >= 60 {
            let hours = mins / 60;
            let mins = mins % 60;
            format!("{}h {}m {}s", hours, mins, secs)
        } else {
            format!("{}m {}s", mins, secs)
        }
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}

/// Progress bar over target bytes written to the output file
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Observer for ProgressObserver {
    fn on_event(&self, event: &ZsyncEvent) {
        match event {
            ZsyncEvent::ControlFileDownloadStarted { .. } | ZsyncEvent::ControlFileReadStarted { .. } => {
                self.bar.set_message("reading control file");
            }
            ZsyncEvent::OutputFileWriteStarted { length, .. } => {
                self.bar.set_length(*length);
                self.bar.set_position(0);
            }
            ZsyncEvent::InputFileReadStarted { path, .. } => {
                self.bar.set_message(format!("scanning {}", path.display()));
            }
            ZsyncEvent::RemoteFileDownloadStarted { .. } => {
                self.bar.set_message("downloading");
            }
            ZsyncEvent::BytesWritten { bytes } => self.bar.inc(*bytes),
            ZsyncEvent::OutputFileWriteComplete { .. } => {
                self.bar.set_message("verified");
            }
            _ => {}
        }
    }
}
