use super::multipart::{self, MultipartError, MultipartReader};
use super::range::{parse_content_range, range_header, ContentRange};
use super::{Credentials, RangeReceiver, TransferListener, TransferReader};
use crate::config::HttpConfig;
use crate::error::{Phase, Result, ZsyncError};
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, RANGE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::io::{self, BufReader, Read};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Credentials by host name
pub type CredentialMap = HashMap<String, Credentials>;

/// Blocking HTTP client for control files and byte-range requests
///
/// Hosts that accepted Basic credentials once get them preemptively on
/// later HTTPS requests. Plain HTTP always waits for a challenge.
pub struct HttpClient {
    client: Client,
    authenticated_hosts: Mutex<HashSet<String>>,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout_secs.map(Duration::from_secs))
            .timeout(config.timeout_secs.map(Duration::from_secs))
            .build()
            .map_err(|e| ZsyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            authenticated_hosts: Mutex::new(HashSet::new()),
        })
    }

    /// Plain GET of a whole resource, used for control files
    pub fn get<L: TransferListener>(
        &self,
        url: &Url,
        credentials: &CredentialMap,
        mut listener: L,
    ) -> Result<TransferReader<Response, L>> {
        listener.initiating(url);
        let response = self.send(url, None, credentials, Phase::ControlFileDownload)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        listener.started(url, response.content_length());
        Ok(TransferReader::new(response, listener))
    }

    /// Fetch `ranges` of `url` in a single request and hand each one to
    /// `receiver` in the order the server sends them
    pub fn partial_get(
        &self,
        url: &Url,
        ranges: &[ContentRange],
        credentials: &CredentialMap,
        receiver: &mut dyn RangeReceiver,
        listener: &mut dyn TransferListener,
    ) -> Result<()> {
        if ranges.is_empty() {
            return Ok(());
        }

        listener.initiating(url);
        let guard = CloseOnDrop(listener);

        let header = range_header(ranges);
        tracing::debug!("GET {} with Range: {}", url, header);
        let response = self.send(url, Some(&header), credentials, Phase::RemoteFileDownload)?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                guard.0.started(url, response.content_length());
                receive_partial(response, receiver, &mut *guard.0)
            }
            StatusCode::OK => {
                tracing::warn!(
                    "{} ignored the Range header, extracting {} ranges from the full body",
                    url.host_str().unwrap_or("server"),
                    ranges.len()
                );
                guard.0.started(url, response.content_length());
                receive_full(response, ranges, receiver, &mut *guard.0)
            }
            status => Err(status_error(status)),
        }
    }

    fn send(
        &self,
        url: &Url,
        range: Option<&str>,
        credentials: &CredentialMap,
        phase: Phase,
    ) -> Result<Response> {
        let host = url.host_str().unwrap_or_default();
        let host_credentials = credentials.get(host);
        let preemptive = match host_credentials {
            Some(credentials) if url.scheme() == "https" && self.is_authenticated(host) => {
                Some(credentials)
            }
            _ => None,
        };

        let response = self.execute(url, range, preemptive, phase)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if preemptive.is_some() {
            return Err(ZsyncError::http(401, "credentials rejected"));
        }
        if !is_basic_challenge(&response) {
            return Err(status_error(StatusCode::UNAUTHORIZED));
        }
        let credentials = host_credentials
            .ok_or_else(|| ZsyncError::http(401, format!("no credentials for host {}", host)))?;

        tracing::debug!("Basic challenge from {}, retrying with credentials", host);
        drop(response);
        let response = self.execute(url, range, Some(credentials), phase)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ZsyncError::http(401, "credentials rejected"));
        }

        if let Ok(mut hosts) = self.authenticated_hosts.lock() {
            hosts.insert(host.to_string());
        }
        Ok(response)
    }

    fn execute(
        &self,
        url: &Url,
        range: Option<&str>,
        credentials: Option<&Credentials>,
        phase: Phase,
    ) -> Result<Response> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        if let Some(credentials) = credentials {
            request = request.header(AUTHORIZATION, credentials.basic());
        }
        request.send().map_err(|e| ZsyncError::Io {
            phase,
            source: io::Error::new(io::ErrorKind::Other, e),
        })
    }

    fn is_authenticated(&self, host: &str) -> bool {
        self.authenticated_hosts
            .lock()
            .map(|hosts| hosts.contains(host))
            .unwrap_or(false)
    }
}

fn receive_partial(
    response: Response,
    receiver: &mut dyn RangeReceiver,
    listener: &mut dyn TransferListener,
) -> Result<()> {
    let content_type = header_value(&response, CONTENT_TYPE.as_str());

    match content_type {
        Some(content_type) if multipart::is_multipart(&content_type) => {
            let boundary = multipart::boundary(&content_type).map_err(multipart_error)?;
            let mut parts = MultipartReader::new(BufReader::new(response), &boundary);
            while let Some((range, part)) = parts.next_part().map_err(multipart_error)? {
                tracing::trace!("Multipart range {}", range);
                let mut body = PayloadReader {
                    inner: part,
                    listener: &mut *listener,
                };
                receiver.receive(range, &mut body)?;
            }
            Ok(())
        }
        _ => {
            let value = header_value(&response, CONTENT_RANGE.as_str())
                .ok_or_else(|| ZsyncError::http(206, "missing Content-Range header"))?;
            let range =
                parse_content_range(&value).map_err(|e| ZsyncError::http(206, e.to_string()))?;
            let mut body = PayloadReader {
                inner: response,
                listener,
            };
            receiver.receive(range, &mut body)
        }
    }
}

fn receive_full(
    response: Response,
    ranges: &[ContentRange],
    receiver: &mut dyn RangeReceiver,
    listener: &mut dyn TransferListener,
) -> Result<()> {
    let mut ranges = ranges.to_vec();
    ranges.sort_by_key(|range| range.first);

    let mut body = BufReader::new(response);
    let mut position = 0u64;
    for range in ranges {
        if range.first < position {
            return Err(ZsyncError::http(200, format!("overlapping range {}", range)));
        }
        let skip = range.first - position;
        let skipped = io::copy(&mut (&mut body).take(skip), &mut io::sink()).map_err(|e| {
            ZsyncError::Io {
                phase: Phase::RemoteFileDownload,
                source: e,
            }
        })?;
        if skipped < skip {
            return Err(ZsyncError::Io {
                phase: Phase::RemoteFileDownload,
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("response ended before {}", range),
                ),
            });
        }

        let mut payload = PayloadReader {
            inner: (&mut body).take(range.length()),
            listener: &mut *listener,
        };
        receiver.receive(range, &mut payload)?;
        position = range.last + 1;
    }
    Ok(())
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn is_basic_challenge(response: &Response) -> bool {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split_whitespace().next())
        .any(|scheme| scheme.eq_ignore_ascii_case("basic"))
}

fn status_error(status: StatusCode) -> ZsyncError {
    ZsyncError::http(
        status.as_u16(),
        status.canonical_reason().unwrap_or("unexpected status"),
    )
}

fn multipart_error(err: MultipartError) -> ZsyncError {
    match err {
        MultipartError::Malformed(reason) => ZsyncError::http(206, reason),
        MultipartError::Io(source) => ZsyncError::Io {
            phase: Phase::RemoteFileDownload,
            source,
        },
    }
}

/// Range body that reports payload bytes to the listener
struct PayloadReader<'a, R> {
    inner: R,
    listener: &'a mut dyn TransferListener,
}

impl<R: Read> Read for PayloadReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.listener.transferred(n as u64);
        }
        Ok(n)
    }
}

struct CloseOnDrop<'a>(&'a mut dyn TransferListener);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.closed();
    }
}
