//! Per-connection state: buffers, parser, response, and the two-segment
//! scatter/gather cursor that tracks a response header region followed by
//! a mapped file body across partial writes.

use std::io::{self, IoSlice, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use tracing::{debug, info};

use crate::buffer::Buffer;
use crate::http::request::{HttpRequest, ParseState, UserVerifier};
use crate::http::response::HttpResponse;

/// Live connections across the whole process.
pub static USER_COUNT: AtomicI32 = AtomicI32::new(0);
/// Whether connection sockets use edge-triggered readiness.
pub static IS_ET: AtomicBool = AtomicBool::new(false);
/// Resource root, fixed at server startup.
pub static SRC_DIR: OnceLock<String> = OnceLock::new();

/// Keep flushing in one task while more than this many bytes remain, to
/// amortize syscalls on large bodies even in level-triggered mode.
const FLUSH_THRESHOLD: usize = 10240;

/// One scatter/gather segment: offset into its backing region plus the
/// remaining length.
#[derive(Debug, Clone, Copy, Default)]
pub struct IoSeg {
    pub off: usize,
    pub len: usize,
}

pub struct HttpConn {
    stream: Option<TcpStream>,
    fd: RawFd,
    addr: Option<SocketAddr>,
    is_close: bool,
    iov: [IoSeg; 2],
    iov_cnt: usize,
    pub read_buff: Buffer,
    pub write_buff: Buffer,
    pub request: HttpRequest,
    pub response: HttpResponse,
}

impl Default for HttpConn {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpConn {
    pub fn new() -> Self {
        HttpConn {
            stream: None,
            fd: -1,
            addr: None,
            is_close: true,
            iov: [IoSeg::default(); 2],
            iov_cnt: 0,
            read_buff: Buffer::new(),
            write_buff: Buffer::new(),
            request: HttpRequest::new(),
            response: HttpResponse::new(),
        }
    }

    /// Arms the slot for a freshly accepted socket. Slots are reused, so
    /// everything left over from the previous occupant is cleared.
    pub fn init(&mut self, stream: TcpStream, addr: SocketAddr) {
        USER_COUNT.fetch_add(1, Ordering::Relaxed);
        self.fd = stream.as_raw_fd();
        self.stream = Some(stream);
        self.addr = Some(addr);
        self.read_buff.retrieve_all();
        self.write_buff.retrieve_all();
        self.iov = [IoSeg::default(); 2];
        self.iov_cnt = 0;
        self.is_close = false;
        info!(
            "Client[{}]({}) in, userCount:{}",
            self.fd,
            addr,
            USER_COUNT.load(Ordering::Relaxed)
        );
    }

    /// Idempotent teardown: releases the file mapping, closes the socket,
    /// drops the connection out of the live count.
    pub fn close(&mut self) {
        self.response.unmap_file();
        if !self.is_close {
            self.is_close = true;
            USER_COUNT.fetch_sub(1, Ordering::Relaxed);
            self.stream = None;
            let peer = self.addr.map(|a| a.to_string()).unwrap_or_default();
            info!(
                "Client[{}]({}) quit, userCount:{}",
                self.fd,
                peer,
                USER_COUNT.load(Ordering::Relaxed)
            );
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.is_close
    }

    pub fn is_keep_alive(&self) -> bool {
        self.request.is_keep_alive()
    }

    pub fn to_write_bytes(&self) -> usize {
        self.iov[0].len + self.iov[1].len
    }

    pub fn head_remaining(&self) -> usize {
        self.iov[0].len
    }

    pub fn file_remaining(&self) -> usize {
        self.iov[1].len
    }

    /// Drains the socket into the read buffer. Under edge-triggered
    /// readiness this loops until the kernel reports `WouldBlock`, which is
    /// passed to the caller; `Ok(0)` means the peer closed.
    pub fn read(&mut self) -> io::Result<usize> {
        let mut last = 0;
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(0);
            };
            let n = self.read_buff.read_from(stream)?;
            if n == 0 {
                return Ok(0);
            }
            last = n;
            if !IS_ET.load(Ordering::Relaxed) {
                break;
            }
        }
        Ok(last)
    }

    /// Parses whatever is buffered and, on a full (or malformed) request,
    /// builds the response and arms the scatter/gather segments.
    ///
    /// Returns `false` while the request is still incomplete; calling again
    /// with the same buffered bytes gives the same answer.
    pub fn process(&mut self, verifier: &dyn UserVerifier) -> bool {
        self.request.init();
        if self.read_buff.readable_bytes() == 0 {
            return false;
        }
        let src_dir = SRC_DIR.get().expect("resource root not initialized");
        if self.request.parse(&mut self.read_buff, verifier) {
            if self.request.state() != ParseState::Finish {
                return false;
            }
            debug!("{}", self.request.path());
            self.response
                .init(src_dir, self.request.path(), self.request.is_keep_alive(), 200);
        } else {
            self.response.init(src_dir, self.request.path(), false, 400);
        }

        self.response.make_response(&mut self.write_buff);
        self.iov[0] = IoSeg {
            off: 0,
            len: self.write_buff.readable_bytes(),
        };
        self.iov[1] = IoSeg::default();
        self.iov_cnt = 1;
        if self.response.file_len() > 0 && self.response.file().is_some() {
            self.iov[1] = IoSeg {
                off: 0,
                len: self.response.file_len(),
            };
            self.iov_cnt = 2;
        }
        debug!(
            "filesize:{}, {} to {}",
            self.response.file_len(),
            self.iov_cnt,
            self.to_write_bytes()
        );
        true
    }

    /// Flushes header and file segments with vectored writes. Loops while
    /// edge-triggered or while more than 10 KiB remains; exits when the
    /// transfer completes or the kernel reports `WouldBlock`.
    pub fn write(&mut self) -> io::Result<usize> {
        let mut last = 0;
        loop {
            let n = {
                let Self {
                    stream,
                    write_buff,
                    response,
                    iov,
                    iov_cnt,
                    ..
                } = self;
                let Some(stream) = stream.as_mut() else {
                    return Ok(0);
                };
                let head = &write_buff.peek()[..iov[0].len];
                let file: &[u8] = match response.file() {
                    Some(m) if *iov_cnt == 2 => &m[iov[1].off..iov[1].off + iov[1].len],
                    _ => &[],
                };
                let slices = [IoSlice::new(head), IoSlice::new(file)];
                stream.write_vectored(&slices[..*iov_cnt])?
            };
            if n == 0 {
                return Ok(0);
            }
            self.consume_written(n);
            last = n;
            if self.to_write_bytes() == 0 {
                break;
            }
            if !(IS_ET.load(Ordering::Relaxed) || self.to_write_bytes() > FLUSH_THRESHOLD) {
                break;
            }
        }
        Ok(last)
    }

    /// Applies `n` bytes of writev progress to the two segments. When the
    /// write crossed out of the header segment, the header buffer is reset
    /// and the remainder is charged to the file segment.
    pub fn consume_written(&mut self, n: usize) {
        if n > self.iov[0].len {
            let file_adv = n - self.iov[0].len;
            debug_assert!(file_adv <= self.iov[1].len);
            self.iov[1].off += file_adv;
            self.iov[1].len -= file_adv;
            if self.iov[0].len > 0 {
                self.write_buff.retrieve_all();
                self.iov[0].len = 0;
            }
        } else {
            self.write_buff.retrieve(n);
            self.iov[0].len -= n;
        }
    }
}
