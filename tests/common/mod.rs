//! Shared fixtures: control file builder and a loopback HTTP/1.1 server

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use digest::Digest;
use md4::Md4;
use sha1::Sha1;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

pub const BOUNDARY: &str = "zsync-test-boundary";

/// Description of a control file over an in-memory target
pub struct ControlFixture<'a> {
    pub target: &'a [u8],
    pub block_size: usize,
    pub hash_lengths: (u8, u8, u8),
    pub url: String,
    pub filename: Option<&'a str>,
    pub mtime: Option<&'a str>,
}

impl<'a> ControlFixture<'a> {
    pub fn new(target: &'a [u8], block_size: usize) -> Self {
        Self {
            target,
            block_size,
            hash_lengths: (1, 4, 16),
            url: "target.bin".to_string(),
            filename: Some("target.bin"),
            mtime: None,
        }
    }

    /// Serialized control file: header, blank line, block table
    pub fn to_bytes(&self) -> Vec<u8> {
        let (seq, rsum_bytes, checksum_bytes) = self.hash_lengths;
        let sha1 = hex::encode(Sha1::digest(self.target));

        let mut header = format!(
            "zsync: 0.6.2\r\nBlocksize: {}\r\nLength: {}\r\nHash-Lengths: {},{},{}\r\nURL: {}\r\nSHA-1: {}\r\n",
            self.block_size,
            self.target.len(),
            seq,
            rsum_bytes,
            checksum_bytes,
            self.url,
            sha1
        );
        if let Some(filename) = self.filename {
            header.push_str(&format!("Filename: {}\r\n", filename));
        }
        if let Some(mtime) = self.mtime {
            header.push_str(&format!("MTime: {}\r\n", mtime));
        }
        header.push_str("\r\n");

        let mut bytes = header.into_bytes();
        for chunk in self.target.chunks(self.block_size) {
            let mut block = chunk.to_vec();
            block.resize(self.block_size, 0);

            let rsum = rsum(&block).to_be_bytes();
            bytes.extend_from_slice(&rsum[4 - rsum_bytes as usize..]);
            let md4 = Md4::digest(&block);
            bytes.extend_from_slice(&md4[..checksum_bytes as usize]);
        }
        bytes
    }
}

/// rsync weak checksum of a whole block, `(a << 16) | b`
pub fn rsum(block: &[u8]) -> u32 {
    let len = block.len();
    let mut a: u16 = 0;
    let mut b: u16 = 0;
    for (i, &byte) in block.iter().enumerate() {
        a = a.wrapping_add(byte as u16);
        b = b.wrapping_add(((len - i) as u16).wrapping_mul(byte as u16));
    }
    ((a as u32) << 16) | b as u32
}

/// Deterministic pseudo-random bytes
pub fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
    use rand::{RngCore, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// How a served resource answers range requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSupport {
    /// 206 with one part or a multipart body
    Partial,
    /// 200 with the full body
    Ignore,
    /// 206 without a Content-Range header
    Malformed,
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub body: Vec<u8>,
    pub ranges: RangeSupport,
    /// `(user, password)` required through Basic auth
    pub auth: Option<(String, String)>,
}

impl Resource {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ranges: RangeSupport::Partial,
            auth: None,
        }
    }

    pub fn ignoring_ranges(mut self) -> Self {
        self.ranges = RangeSupport::Ignore;
        self
    }

    pub fn malformed_ranges(mut self) -> Self {
        self.ranges = RangeSupport::Malformed;
        self
    }

    pub fn with_auth(mut self, user: &str, password: &str) -> Self {
        self.auth = Some((user.to_string(), password.to_string()));
        self
    }
}

/// One request as seen by the server; header names are lowercase
#[derive(Debug, Clone)]
pub struct Request {
    pub path: String,
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Minimal HTTP/1.1 server, one connection per request
pub struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl StubServer {
    pub fn start(resources: Vec<(&str, Resource)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let resources: HashMap<String, Resource> = resources
            .into_iter()
            .map(|(path, resource)| (path.to_string(), resource))
            .collect();

        let log = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let _ = handle(stream, &resources, &log);
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// `Range` headers of all requests for `path`, in order
    pub fn range_headers(&self, path: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .filter_map(|request| request.header("range").map(str::to_string))
            .collect()
    }
}

fn handle(
    stream: TcpStream,
    resources: &HashMap<String, Resource>,
    log: &Mutex<Vec<Request>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let path = line.split_whitespace().nth(1).unwrap_or("/").to_string();

    let mut headers = HashMap::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let request = Request { path, headers };
    log.lock().unwrap().push(request.clone());

    let mut stream = stream;
    let response = respond(&request, resources);
    stream.write_all(&response)?;
    stream.flush()
}

fn respond(request: &Request, resources: &HashMap<String, Resource>) -> Vec<u8> {
    let Some(resource) = resources.get(&request.path) else {
        return response("404 Not Found", &[], b"not found");
    };

    if let Some((user, password)) = &resource.auth {
        let expected = format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)));
        if request.header("authorization") != Some(expected.as_str()) {
            return response(
                "401 Unauthorized",
                &[("WWW-Authenticate", "Basic realm=\"test\"".to_string())],
                b"unauthorized",
            );
        }
    }

    let ranges = match request.header("range") {
        Some(value) if resource.ranges != RangeSupport::Ignore => parse_ranges(value),
        _ => return response("200 OK", &[], &resource.body),
    };
    let total = resource.body.len();

    if resource.ranges == RangeSupport::Malformed {
        return response("206 Partial Content", &[], &resource.body[..1]);
    }

    if let &[(first, last)] = ranges.as_slice() {
        return response(
            "206 Partial Content",
            &[(
                "Content-Range",
                format!("bytes {}-{}/{}", first, last, total),
            )],
            &resource.body[first..=last],
        );
    }

    let mut body = Vec::new();
    for (first, last) in ranges {
        body.extend_from_slice(
            format!(
                "\r\n--{}\r\nContent-Type: application/octet-stream\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
                BOUNDARY, first, last, total
            )
            .as_bytes(),
        );
        body.extend_from_slice(&resource.body[first..=last]);
    }
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    response(
        "206 Partial Content",
        &[(
            "Content-Type",
            format!("multipart/byteranges; boundary={}", BOUNDARY),
        )],
        &body,
    )
}

fn parse_ranges(value: &str) -> Vec<(usize, usize)> {
    value
        .trim_start_matches("bytes=")
        .split(',')
        .filter_map(|range| range.trim().split_once('-'))
        .map(|(first, last)| (first.parse().unwrap(), last.parse().unwrap()))
        .collect()
}

fn response(status: &str, headers: &[(&str, String)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n", status, body.len());
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}
