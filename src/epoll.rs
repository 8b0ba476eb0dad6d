//! Thin wrapper over the kernel readiness notifier (epoll).
//!
//! Interest masks are plain `u32` unions of the `EPOLL_*` constants below.
//! `EPOLL_ONESHOT` makes a registration inert after one delivered event
//! until re-armed with `mod_fd`; `EPOLL_ET` delivers one wakeup per
//! readiness edge and the handler must drain to `WouldBlock`.

use std::io;
use std::os::fd::RawFd;

pub const EPOLL_IN: u32 = libc::EPOLLIN as u32;
pub const EPOLL_OUT: u32 = libc::EPOLLOUT as u32;
pub const EPOLL_RDHUP: u32 = libc::EPOLLRDHUP as u32;
pub const EPOLL_HUP: u32 = libc::EPOLLHUP as u32;
pub const EPOLL_ERR: u32 = libc::EPOLLERR as u32;
pub const EPOLL_ET: u32 = libc::EPOLLET as u32;
pub const EPOLL_ONESHOT: u32 = libc::EPOLLONESHOT as u32;

pub type EpollEvent = libc::epoll_event;

pub fn event_fd(ev: &EpollEvent) -> RawFd {
    ev.u64 as RawFd
}

pub fn event_mask(ev: &EpollEvent) -> u32 {
    ev.events
}

#[derive(Debug)]
pub struct Epoller {
    epfd: RawFd,
}

impl Epoller {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Epoller { epfd })
    }

    pub fn add_fd(&self, fd: RawFd, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, events)
    }

    pub fn mod_fd(&self, fd: RawFd, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, events)
    }

    pub fn del_fd(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0)
    }

    /// Blocks for up to `timeout_ms` milliseconds (-1 blocks indefinitely)
    /// and returns how many entries of `events` were filled.
    pub fn wait(&self, events: &mut [EpollEvent], timeout_ms: i32) -> io::Result<usize> {
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> io::Result<()> {
        let mut ev = EpollEvent {
            events,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Epoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
