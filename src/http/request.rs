//! Incremental HTTP/1.1 request parser.
//!
//! The parser scans the connection's read buffer without consuming it and
//! only retrieves bytes once a full request has been recognized, so a
//! caller may re-run it on the same buffer after a short read and observe
//! the same outcome.

use std::collections::HashMap;

use memchr::memmem;
use tracing::debug;

use crate::buffer::Buffer;

/// A line (or a request head fragment) longer than this without a CR LF is
/// a protocol violation.
pub const MAX_LINE: usize = 8192;
/// Cap on the declared request body.
pub const MAX_BODY: usize = 8 * 1024 * 1024;

/// Well-known short targets that map onto their `.html` page.
const DEFAULT_HTML: [&str; 6] = [
    "/index",
    "/register",
    "/login",
    "/welcome",
    "/video",
    "/picture",
];

/// Hook for the account check behind the login and register pages.
pub trait UserVerifier: Send + Sync {
    fn verify(&self, name: &str, pwd: &str, is_login: bool) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
    Finish,
}

enum LineScan {
    Complete(usize),
    Partial,
    TooLong,
}

fn find_line(haystack: &[u8]) -> LineScan {
    match memmem::find(haystack, b"\r\n") {
        Some(i) => LineScan::Complete(i),
        None if haystack.len() >= MAX_LINE => LineScan::TooLong,
        None => LineScan::Partial,
    }
}

#[derive(Debug)]
pub struct HttpRequest {
    state: ParseState,
    method: String,
    path: String,
    version: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    form: HashMap<String, String>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            state: ParseState::RequestLine,
            method: String::new(),
            path: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            form: HashMap::new(),
        }
    }

    /// Resets the parser for the next request on the same connection.
    pub fn init(&mut self) {
        self.state = ParseState::RequestLine;
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.headers.clear();
        self.body.clear();
        self.form.clear();
    }

    /// Drives the state machine over the buffer's readable region.
    ///
    /// Returns `false` on a protocol violation. Returns `true` otherwise,
    /// whether or not the request is complete; completeness is observable
    /// as `state() == ParseState::Finish`. Bytes are consumed from the
    /// buffer only when a full request was recognized, and then exactly
    /// the request's bytes are taken — so a call on an incomplete request
    /// leaves the buffer untouched and the next call rescans from the
    /// start.
    pub fn parse(&mut self, buff: &mut Buffer, verifier: &dyn UserVerifier) -> bool {
        if buff.readable_bytes() == 0 {
            return false;
        }
        self.init();
        let mut pos = 0;
        while self.state != ParseState::Finish {
            let readable = buff.peek();
            match self.state {
                ParseState::RequestLine => match find_line(&readable[pos..]) {
                    LineScan::Complete(end) => {
                        let line = &readable[pos..pos + end];
                        if !self.parse_request_line(line) {
                            return false;
                        }
                        self.parse_path();
                        pos += end + 2;
                    }
                    LineScan::Partial => return true,
                    LineScan::TooLong => return false,
                },
                ParseState::Headers => match find_line(&readable[pos..]) {
                    LineScan::Complete(0) => {
                        pos += 2;
                        self.state = if self.headers.contains_key("Content-Length") {
                            ParseState::Body
                        } else {
                            ParseState::Finish
                        };
                    }
                    LineScan::Complete(end) => {
                        let line = &readable[pos..pos + end];
                        if !self.parse_header(line) {
                            return false;
                        }
                        pos += end + 2;
                    }
                    LineScan::Partial => return true,
                    LineScan::TooLong => return false,
                },
                ParseState::Body => {
                    let len = match self
                        .headers
                        .get("Content-Length")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                    {
                        Some(n) if n <= MAX_BODY => n,
                        _ => return false,
                    };
                    if readable.len() - pos < len {
                        return true;
                    }
                    self.body = readable[pos..pos + len].to_vec();
                    pos += len;
                    self.parse_post(verifier);
                    self.state = ParseState::Finish;
                }
                ParseState::Finish => break,
            }
        }
        buff.retrieve(pos);
        debug!("[{}] [{}] [{}]", self.method, self.path, self.version);
        true
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form.get(key).map(String::as_str)
    }

    pub fn is_keep_alive(&self) -> bool {
        self.header("Connection") == Some("keep-alive") && self.version == "1.1"
    }

    fn parse_request_line(&mut self, line: &[u8]) -> bool {
        let Ok(line) = std::str::from_utf8(line) else {
            return false;
        };
        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(proto)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        if parts.next().is_some() {
            return false;
        }
        let Some(version) = proto.strip_prefix("HTTP/") else {
            return false;
        };
        if method.is_empty() || target.is_empty() || version.is_empty() {
            return false;
        }
        self.method = method.to_string();
        self.path = target.to_string();
        self.version = version.to_string();
        self.state = ParseState::Headers;
        true
    }

    fn parse_path(&mut self) {
        if self.path == "/" {
            self.path = "/index.html".to_string();
        } else if DEFAULT_HTML.contains(&self.path.as_str()) {
            self.path.push_str(".html");
        }
    }

    fn parse_header(&mut self, line: &[u8]) -> bool {
        let Ok(line) = std::str::from_utf8(line) else {
            return false;
        };
        let Some((field, rest)) = line.split_once(':') else {
            return false;
        };
        if field.is_empty() {
            return false;
        }
        // Optional single space after the colon.
        let value = rest.strip_prefix(' ').unwrap_or(rest);
        self.headers.insert(field.to_string(), value.to_string());
        true
    }

    /// Decodes an urlencoded POST body and, for the login and register
    /// pages, routes the credentials through the verifier. The result picks
    /// the page the client lands on.
    fn parse_post(&mut self, verifier: &dyn UserVerifier) {
        if self.method != "POST"
            || self.header("Content-Type") != Some("application/x-www-form-urlencoded")
        {
            return;
        }
        self.parse_from_urlencoded();
        let tag = match self.path.as_str() {
            "/register.html" => 0,
            "/login.html" => 1,
            _ => return,
        };
        debug!("Tag:{tag}");
        let name = self.form.get("username").cloned().unwrap_or_default();
        let pwd = self.form.get("password").cloned().unwrap_or_default();
        if verifier.verify(&name, &pwd, tag == 1) {
            self.path = "/welcome.html".to_string();
        } else {
            self.path = "/error.html".to_string();
        }
    }

    fn parse_from_urlencoded(&mut self) {
        if self.body.is_empty() {
            return;
        }
        for pair in self.body.split(|&b| b == b'&') {
            let mut kv = pair.splitn(2, |&b| b == b'=');
            let (Some(k), Some(v)) = (kv.next(), kv.next()) else {
                continue;
            };
            let key = url_decode(k);
            let value = url_decode(v);
            debug!("{key} = {value}");
            self.form.insert(key, value);
        }
    }
}

/// Decodes `+` to space and `%HH` to the byte it names, collapsing the
/// three encoded bytes into one. Malformed escapes pass through verbatim.
pub fn url_decode(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < raw.len() => match (hex_val(raw[i + 1]), hex_val(raw[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push(hi * 16 + lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
