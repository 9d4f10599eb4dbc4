pub mod events;
pub mod stats;
pub mod writer;

pub use events::{DownloadListener, EventDispatcher, JsonObserver, ObservedReader, Observer, ZsyncEvent};
pub use stats::{StatsObserver, ZsyncStats};
pub use writer::OutputFileWriter;

use crate::config::HttpConfig;
use crate::control::ControlFile;
use crate::delta::Matcher;
use crate::error::{format_bytes, IoResultExt, Phase, Result, ZsyncError};
use crate::transport::http::CredentialMap;
use crate::transport::HttpClient;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Parameters of one zsync invocation
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Local files that may share content with the target, scanned in order
    pub inputs: Vec<PathBuf>,

    /// Output path; defaults to the control file's `Filename` in the
    /// current directory
    pub output: Option<PathBuf>,

    /// Remote target URL, overriding the control file's `URL`
    pub url: Option<Url>,

    /// Basic auth credentials by host name
    pub credentials: CredentialMap,

    pub http: HttpConfig,
}

/// Where the control file comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSource {
    Remote(Url),
    Local(PathBuf),
}

impl ControlSource {
    /// `http(s)://` and `file://` URLs, or a plain local path
    pub fn parse(uri: &str) -> Result<Self> {
        match Url::parse(uri) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Self::Remote(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|_| ZsyncError::Config(format!("invalid file URL '{}'", uri))),
            // A one-letter scheme is a Windows drive letter
            Ok(url) if url.scheme().len() > 1 => Err(ZsyncError::Config(format!(
                "unsupported URL scheme '{}' in '{}'",
                url.scheme(),
                uri
            ))),
            _ => Ok(Self::Local(PathBuf::from(uri))),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::Local(path) => path.display().to_string(),
        }
    }
}

/// Reassembles remote files from control files, local inputs and range
/// requests
pub struct Zsync {
    client: HttpClient,
}

impl Zsync {
    pub fn new(http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(http)?,
        })
    }

    /// Run one invocation and return the path of the verified output file
    ///
    /// Emits `ZsyncStarted` first and exactly one of `ZsyncComplete` or
    /// `ZsyncFailed` last.
    pub fn zsync(&self, uri: &str, options: &Options, events: &EventDispatcher) -> Result<PathBuf> {
        events.emit(ZsyncEvent::ZsyncStarted {
            uri: uri.to_string(),
        });

        match self.run(uri, options, events) {
            Ok(path) => {
                events.emit(ZsyncEvent::ZsyncComplete { path: path.clone() });
                Ok(path)
            }
            Err(e) => {
                events.emit(ZsyncEvent::ZsyncFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn run(&self, uri: &str, options: &Options, events: &EventDispatcher) -> Result<PathBuf> {
        let source = ControlSource::parse(uri)?;
        let control = self.read_control_file(&source, options, events)?;
        let header = control.header();

        let remote_url = resolve_remote_url(options.url.as_ref(), &header.url, &source)?;
        let output = match &options.output {
            Some(path) => path.clone(),
            None => default_output(&header.filename)?,
        };
        tracing::info!(
            "Target {} ({}, {} blocks of {})",
            output.display(),
            format_bytes(header.length),
            header.num_blocks(),
            header.block_size
        );

        let mut inputs = options.inputs.clone();
        if output.is_file() && !inputs.contains(&output) {
            tracing::debug!("Using existing {} as an input", output.display());
            inputs.push(output.clone());
        }

        let mut writer = OutputFileWriter::new(&output, &control, events.clone())?;
        for input in &inputs {
            if writer.is_complete() {
                tracing::debug!("All blocks present, skipping {}", input.display());
                continue;
            }
            scan_input(input, &control, &mut writer, events)?;
        }

        if !writer.is_complete() {
            let ranges = writer.missing_ranges();
            tracing::info!(
                "Downloading {} in {} ranges from {}",
                format_bytes(writer.missing_bytes()),
                ranges.len(),
                remote_url
            );
            let mut listener = DownloadListener::remote_file(events.clone(), ranges.clone());
            self.client.partial_get(
                &remote_url,
                &ranges,
                &options.credentials,
                &mut writer,
                &mut listener,
            )?;

            if !writer.is_complete() {
                return Err(ZsyncError::IncompleteTransfer {
                    missing_blocks: writer.blocks_remaining(),
                    missing_bytes: writer.missing_bytes(),
                });
            }
        }

        writer.close()
    }

    fn read_control_file(
        &self,
        source: &ControlSource,
        options: &Options,
        events: &EventDispatcher,
    ) -> Result<ControlFile> {
        let uri = source.describe();
        let control = match source {
            ControlSource::Remote(url) => {
                let listener = DownloadListener::control_file(events.clone());
                let body = self.client.get(url, &options.credentials, listener)?;
                events.emit(ZsyncEvent::ControlFileReadStarted { uri, length: None });
                ControlFile::read(BufReader::new(ObservedReader::new(body, events)))?
            }
            ControlSource::Local(path) => {
                let file = File::open(path).in_phase(Phase::ControlFileRead)?;
                let length = file.metadata().ok().map(|meta| meta.len());
                events.emit(ZsyncEvent::ControlFileReadStarted { uri, length });
                ControlFile::read(BufReader::new(ObservedReader::new(file, events)))?
            }
        };
        events.emit(ZsyncEvent::ControlFileReadComplete);
        Ok(control)
    }
}

fn scan_input(
    path: &Path,
    control: &ControlFile,
    writer: &mut OutputFileWriter,
    events: &EventDispatcher,
) -> Result<()> {
    let file = File::open(path).in_phase(Phase::InputFileRead)?;
    let length = file.metadata().ok().map(|meta| meta.len());
    let before = writer.blocks_remaining();

    events.emit(ZsyncEvent::InputFileReadStarted {
        path: path.to_path_buf(),
        length,
    });
    Matcher::new(control).scan(writer, ObservedReader::new(file, events))?;
    events.emit(ZsyncEvent::InputFileReadComplete {
        path: path.to_path_buf(),
    });

    tracing::info!(
        "{}: {} blocks matched, {} remaining",
        path.display(),
        before - writer.blocks_remaining(),
        writer.blocks_remaining()
    );
    Ok(())
}

/// Remote URL of the target
///
/// An explicit override wins; otherwise the control file's URL, resolved
/// against the control file's own URL when relative.
pub fn resolve_remote_url(
    override_url: Option<&Url>,
    header_url: &str,
    source: &ControlSource,
) -> Result<Url> {
    let url = match override_url {
        Some(url) => url.clone(),
        None => match Url::parse(header_url) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => match source {
                ControlSource::Remote(base) => base.join(header_url).map_err(|e| {
                    ZsyncError::Config(format!("invalid URL '{}': {}", header_url, e))
                })?,
                ControlSource::Local(_) => {
                    return Err(ZsyncError::Config(format!(
                        "relative URL '{}' in a local control file needs an explicit remote URL",
                        header_url
                    )))
                }
            },
            Err(e) => {
                return Err(ZsyncError::Config(format!(
                    "invalid URL '{}': {}",
                    header_url, e
                )))
            }
        },
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ZsyncError::Config(format!(
            "remote URL must be http or https: {}",
            url
        )));
    }
    Ok(url)
}

/// File-name component of the control file's `Filename`
fn default_output(filename: &str) -> Result<PathBuf> {
    Path::new(filename)
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| ZsyncError::Config(format!("unusable Filename '{}'", filename)))
}

/// Run one zsync invocation with an optional observer
pub fn zsync(uri: &str, options: &Options, observer: Option<Arc<dyn Observer>>) -> Result<PathBuf> {
    let events = match observer {
        Some(observer) => EventDispatcher::with_observer(observer),
        None => EventDispatcher::new(),
    };
    Zsync::new(&options.http)?.zsync(uri, options, &events)
}
