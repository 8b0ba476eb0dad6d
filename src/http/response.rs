//! Response assembly: status line and headers into the write buffer, the
//! body as a private read-only mapping of the target file.

use std::fs::{self, File};
use std::os::unix::fs::MetadataExt;

use memmap2::Mmap;
use tracing::debug;

use crate::buffer::Buffer;

fn status_text(code: u16) -> Option<&'static str> {
    match code {
        200 => Some("OK"),
        400 => Some("Bad Request"),
        403 => Some("Forbidden"),
        404 => Some("Not Found"),
        _ => None,
    }
}

fn error_page(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

fn mime_type(path: &str) -> &'static str {
    let Some(idx) = path.rfind('.') else {
        return "text/plain";
    };
    match &path[idx..] {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/msword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" => "image/jpeg",
        ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" => "video/mpeg",
        ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => "text/plain",
    }
}

#[derive(Default)]
pub struct HttpResponse {
    code: u16,
    is_keep_alive: bool,
    path: String,
    src_dir: String,
    file: Option<Mmap>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the response for a new request. Any previous file mapping is
    /// released before its fields are overwritten.
    pub fn init(&mut self, src_dir: &str, path: &str, is_keep_alive: bool, code: u16) {
        debug_assert!(!src_dir.is_empty());
        self.unmap_file();
        self.code = code;
        self.is_keep_alive = is_keep_alive;
        self.path = path.to_string();
        self.src_dir = src_dir.to_string();
    }

    /// Stats the target, rewrites onto an error page if needed, then
    /// appends status line and headers to `buff` and maps the body.
    pub fn make_response(&mut self, buff: &mut Buffer) {
        if self.code < 400 {
            self.code = match fs::metadata(self.full_path()) {
                Ok(meta) if meta.is_dir() => 404,
                // World-readable bit; everything this server serves is public.
                Ok(meta) if meta.mode() & 0o004 == 0 => 403,
                Ok(_) => 200,
                Err(_) => 404,
            };
        }
        self.error_html();
        self.add_state_line(buff);
        self.add_header(buff);
        self.add_content(buff);
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The mapped body, if the target file was mapped successfully.
    pub fn file(&self) -> Option<&Mmap> {
        self.file.as_ref()
    }

    pub fn file_len(&self) -> usize {
        self.file.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    /// Releases the mapping. Must run before re-init and on connection
    /// close; dropping the `Mmap` unmaps.
    pub fn unmap_file(&mut self) {
        self.file = None;
    }

    fn error_html(&mut self) {
        if let Some(page) = error_page(self.code) {
            self.path = page.to_string();
        }
    }

    fn add_state_line(&mut self, buff: &mut Buffer) {
        let status = match status_text(self.code) {
            Some(s) => s,
            None => {
                self.code = 400;
                "Bad Request"
            }
        };
        buff.append(format!("HTTP/1.1 {} {}\r\n", self.code, status).as_bytes());
    }

    fn add_header(&mut self, buff: &mut Buffer) {
        buff.append(b"Connection: ");
        if self.is_keep_alive {
            buff.append(b"keep-alive\r\n");
            buff.append(b"keep-alive: max=6, timeout=120\r\n");
        } else {
            buff.append(b"close\r\n");
        }
        buff.append(format!("Content-type: {}\r\n", mime_type(&self.path)).as_bytes());
    }

    /// Maps the target file and appends the Content-length terminator. The
    /// descriptor is closed right away; the mapping outlives it. Open or
    /// map failures fall back to a small inline error body.
    fn add_content(&mut self, buff: &mut Buffer) {
        let file = match File::open(self.full_path()) {
            Ok(f) => f,
            Err(_) => {
                self.error_content(buff, "File NotFound");
                return;
            }
        };
        debug!("file path {}", self.full_path());
        // SAFETY: read-only private mapping; this process never truncates
        // the files it serves.
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(m) => m,
            Err(_) => {
                self.error_content(buff, "File NotFound");
                return;
            }
        };
        buff.append(format!("Content-length: {}\r\n\r\n", mmap.len()).as_bytes());
        self.file = Some(mmap);
    }

    /// Inline HTML error body for when even the error page cannot be
    /// served.
    pub fn error_content(&self, buff: &mut Buffer, message: &str) {
        let status = status_text(self.code).unwrap_or("Bad Request");
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n\
             <p>{}</p><hr><em>webserver</em></body></html>",
            self.code, status, message
        );
        buff.append(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
        buff.append(body.as_bytes());
    }

    fn full_path(&self) -> String {
        format!("{}{}", self.src_dir, self.path)
    }
}
