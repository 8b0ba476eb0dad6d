//! Growable byte buffer with separate read and write cursors.
//!
//! The region layout is `[0, read_pos)` prependable, `[read_pos, write_pos)`
//! readable, `[write_pos, capacity)` writable. Reclaiming space prefers
//! shifting the readable region to offset 0 over growing.

use std::io::{self, IoSliceMut, Read, Write};

const INIT_SIZE: usize = 1024;
const SCRATCH_SIZE: usize = 65536;

#[derive(Debug)]
pub struct Buffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(INIT_SIZE)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Buffer {
            buf: vec![0; cap],
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    /// The readable region.
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// The writable region, for callers that fill the buffer themselves
    /// and then account for it with [`has_written`](Self::has_written).
    pub fn begin_write(&mut self) -> &mut [u8] {
        &mut self.buf[self.write_pos..]
    }

    /// Makes room for at least `len` more bytes, shifting the readable
    /// region down when the slack on both ends suffices and growing
    /// otherwise.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    /// Advances the write cursor after an external fill of the writable
    /// region.
    pub fn has_written(&mut self, len: usize) {
        debug_assert!(len <= self.writable_bytes());
        self.write_pos += len;
    }

    pub fn retrieve(&mut self, len: usize) {
        assert!(len <= self.readable_bytes());
        self.read_pos += len;
    }

    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Removes and returns the next `len` readable bytes.
    pub fn take(&mut self, len: usize) -> Vec<u8> {
        assert!(len <= self.readable_bytes());
        let out = self.buf[self.read_pos..self.read_pos + len].to_vec();
        self.retrieve(len);
        out
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        self.buf[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    /// Vectored fill from `reader` into the writable region plus a 64 KiB
    /// stack scratch area. Overflow that landed in the scratch is appended
    /// (growing the buffer), so a single call is bounded while still
    /// draining bursty sockets in few syscalls.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let n = {
            let (_, writable) = self.buf.split_at_mut(self.write_pos);
            let mut iovs = [IoSliceMut::new(writable), IoSliceMut::new(&mut scratch)];
            reader.read_vectored(&mut iovs)?
        };
        let writable = self.buf.len() - self.write_pos;
        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.buf.len();
            self.append(&scratch[..n - writable]);
        }
        Ok(n)
    }

    /// Writes the readable region to `writer` and consumes what was taken.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let n = writer.write(self.peek())?;
        self.retrieve(n);
        Ok(n)
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.buf.resize(self.write_pos + len, 0);
        } else {
            let readable = self.readable_bytes();
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }
}
