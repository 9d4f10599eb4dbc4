use clap::Parser;
use std::path::PathBuf;
use url::Url;
use zsync::Credentials;

/// Parse `HOST=USER:PASS`
pub fn parse_auth(s: &str) -> Result<(String, Credentials), String> {
    let (host, credentials) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid auth '{}': expected HOST=USER:PASS", s))?;

    let host = host.trim();
    if host.is_empty() {
        return Err(format!("Invalid auth '{}': empty host", s));
    }

    let credentials = credentials
        .parse::<Credentials>()
        .map_err(|e| format!("Invalid auth for '{}': {}", host, e))?;
    Ok((host.to_string(), credentials))
}

fn parse_url(s: &str) -> Result<Url, String> {
    let url = Url::parse(s).map_err(|e| format!("Invalid URL '{}': {}", s, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("Invalid URL '{}': must be http or https", s));
    }
    Ok(url)
}

#[derive(Parser, Debug)]
#[command(name = "zsync")]
#[command(about = "Download a file using a zsync control file and local seed files", long_about = None)]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Download, reusing an older local copy
    zsync https://example.com/image.iso.zsync -i image-old.iso

    # Local control file, explicit remote URL
    zsync image.iso.zsync -u https://mirror.example.com/image.iso

    # Several seeds, custom output
    zsync https://example.com/image.iso.zsync -i a.iso -i b.iso -o new.iso

    # Basic auth for a host
    zsync https://example.com/image.iso.zsync -A example.com=jdoe:secret

    # Machine-readable events and statistics
    zsync https://example.com/image.iso.zsync --json --stats")]
pub struct Cli {
    /// Control file: http(s) URL, file:// URL or local path
    pub uri: String,

    /// Local file that may share content with the target (repeatable)
    #[arg(short, long = "input", value_name = "PATH")]
    pub inputs: Vec<PathBuf>,

    /// Output file (default: the control file's Filename)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Remote target URL, overriding the control file's URL
    #[arg(short, long, value_name = "URL", value_parser = parse_url)]
    pub url: Option<Url>,

    /// Basic auth credentials for a host (repeatable)
    #[arg(short = 'A', long = "auth", value_name = "HOST=USER:PASS", value_parser = parse_auth)]
    pub auth: Vec<(String, Credentials)>,

    /// Overall HTTP timeout in seconds (overrides config)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print events as NDJSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Print transfer statistics when done
    #[arg(long)]
    pub stats: bool,
}

impl Cli {
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet || self.json {
            return tracing::Level::ERROR;
        }

        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    /// Whether to draw the progress bar
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.json
    }
}
