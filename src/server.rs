//! The reactor: owns the listening socket, the readiness notifier, the
//! timing heap, the worker pool, and the connection table, and runs the
//! dispatch loop.
//!
//! Connection sockets are registered one-shot, so at most one worker task
//! is in flight per descriptor; the worker re-arms the registration right
//! before it returns. Each connection slot is an `Arc<Mutex<_>>` so the
//! eviction callback and a late worker task serialize instead of racing.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::Config;
use crate::epoll::{
    EPOLL_ERR, EPOLL_ET, EPOLL_HUP, EPOLL_IN, EPOLL_ONESHOT, EPOLL_OUT, EPOLL_RDHUP, EpollEvent,
    Epoller, event_fd, event_mask,
};
use crate::pool::ThreadPool;
use crate::prelude::*;
use crate::timer::HeapTimer;

pub struct WebServer {
    timeout_ms: u64,
    listener: TcpListener,
    listen_event: u32,
    conn_event: u32,
    timer: HeapTimer,
    threadpool: ThreadPool,
    epoller: Arc<Epoller>,
    users: HashMap<RawFd, Arc<Mutex<HttpConn>>>,
    verifier: Arc<dyn UserVerifier>,
    events: Vec<EpollEvent>,
}

impl WebServer {
    pub fn new(config: Config, verifier: Arc<dyn UserVerifier>) -> Result<Self> {
        config.validate()?;

        let src_dir = format!("{}/resources/", std::env::current_dir()?.display());
        let _ = SRC_DIR.set(src_dir);

        let (listen_event, conn_event) = Self::init_event_mode(config.trig_mode);
        let epoller = Arc::new(Epoller::new()?);
        let listener = Self::init_socket(&config, &epoller, listen_event)?;

        info!("========== Server init ==========");
        info!(
            "Port:{}, OpenLinger: {}",
            config.port, config.open_linger
        );
        info!(
            "Listen Mode: {}, OpenConn Mode: {}",
            if listen_event & EPOLL_ET != 0 { "ET" } else { "LT" },
            if conn_event & EPOLL_ET != 0 { "ET" } else { "LT" },
        );
        info!("srcDir: {}", SRC_DIR.get().map(String::as_str).unwrap_or(""));
        info!(
            "SqlConnPool num: {}, ThreadPool num: {}",
            config.sql.pool_num, config.thread_num
        );

        Ok(WebServer {
            timeout_ms: config.timeout_ms,
            listener,
            listen_event,
            conn_event,
            timer: HeapTimer::new(),
            threadpool: ThreadPool::new(config.thread_num)?,
            epoller,
            users: HashMap::new(),
            verifier,
            events: vec![EpollEvent { events: 0, u64: 0 }; MAX_EVENTS],
        })
    }

    /// Runs the dispatch loop: evict expired connections, wait on the
    /// notifier no longer than the next deadline, then fan events out.
    pub fn run(&mut self) -> Result<()> {
        info!("========== Server start ==========");
        let listen_fd = self.listener.as_raw_fd();
        loop {
            let timeout_ms = if self.timeout_ms > 0 {
                self.timer.next_tick()
            } else {
                -1
            };
            let n = match self.epoller.wait(&mut self.events, timeout_ms) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            for i in 0..n {
                let fd = event_fd(&self.events[i]);
                let events = event_mask(&self.events[i]);
                if fd == listen_fd {
                    self.deal_listen();
                } else if events & (EPOLL_RDHUP | EPOLL_HUP | EPOLL_ERR) != 0 {
                    self.close_by_fd(fd);
                } else if events & EPOLL_IN != 0 {
                    self.deal_read(fd);
                } else if events & EPOLL_OUT != 0 {
                    self.deal_write(fd);
                } else {
                    error!("Unexpected event");
                }
            }
        }
    }

    /// Listen socket default interest is read + peer-close; connections add
    /// one-shot so a delivered event stays exclusive to one worker until
    /// re-armed. Modes 1-3 layer edge triggering on top.
    fn init_event_mode(trig_mode: u8) -> (u32, u32) {
        let mut listen_event = EPOLL_RDHUP;
        let mut conn_event = EPOLL_ONESHOT | EPOLL_RDHUP;
        match trig_mode {
            0 => {}
            1 => conn_event |= EPOLL_ET,
            2 => listen_event |= EPOLL_ET,
            _ => {
                listen_event |= EPOLL_ET;
                conn_event |= EPOLL_ET;
            }
        }
        IS_ET.store(conn_event & EPOLL_ET != 0, Ordering::Relaxed);
        (listen_event, conn_event)
    }

    fn init_socket(config: &Config, epoller: &Epoller, listen_event: u32) -> Result<TcpListener> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        if config.open_linger {
            // Give a closing socket one second to flush what is queued.
            socket.set_linger(Some(Duration::from_secs(1)))?;
        }
        socket.set_reuse_address(true)?;
        let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        let listener: TcpListener = socket.into();
        epoller.add_fd(listener.as_raw_fd(), listen_event | EPOLL_IN)?;
        info!("Server port:{}", config.port);
        Ok(listener)
    }

    /// Accepts until the backlog is drained (edge) or once (level). Over
    /// the client cap, the newcomer gets a short notice and is dropped.
    fn deal_listen(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("accept error: {e}");
                    return;
                }
            };
            if USER_COUNT.load(Ordering::Relaxed) >= MAX_FD {
                Self::send_error(stream, "Server busy!");
                warn!("Clients is full!");
                return;
            }
            self.add_client(stream, addr);
            if self.listen_event & EPOLL_ET == 0 {
                return;
            }
        }
    }

    fn add_client(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!("set_nonblocking failed: {e}");
            return;
        }
        let fd = stream.as_raw_fd();
        let conn = Arc::clone(self.users.entry(fd).or_default());
        conn.lock().unwrap().init(stream, addr);
        if self.timeout_ms > 0 {
            let conn_cb = Arc::clone(&conn);
            let epoller_cb = Arc::clone(&self.epoller);
            self.timer
                .add(fd, self.timeout_ms, move || close_conn(&epoller_cb, &conn_cb));
        }
        if let Err(e) = self.epoller.add_fd(fd, EPOLL_IN | self.conn_event) {
            error!("epoll add failed: {e}");
            close_conn(&self.epoller, &conn);
            return;
        }
        debug!("Client[{fd}] in!");
    }

    fn send_error(mut stream: TcpStream, info: &str) {
        if stream.write_all(info.as_bytes()).is_err() {
            warn!("send busy notice failed");
        }
        // stream drops here, closing the descriptor
    }

    fn deal_read(&mut self, fd: RawFd) {
        let Some(conn) = self.users.get(&fd) else {
            return;
        };
        let conn = Arc::clone(conn);
        self.extend_time(fd);
        let epoller = Arc::clone(&self.epoller);
        let verifier = Arc::clone(&self.verifier);
        let conn_event = self.conn_event;
        self.threadpool
            .add_task(move || on_read(&conn, &epoller, &*verifier, conn_event));
    }

    fn deal_write(&mut self, fd: RawFd) {
        let Some(conn) = self.users.get(&fd) else {
            return;
        };
        let conn = Arc::clone(conn);
        self.extend_time(fd);
        let epoller = Arc::clone(&self.epoller);
        let verifier = Arc::clone(&self.verifier);
        let conn_event = self.conn_event;
        self.threadpool
            .add_task(move || on_write(&conn, &epoller, &*verifier, conn_event));
    }

    /// Any readiness on a connection counts as activity and pushes its
    /// eviction deadline out.
    fn extend_time(&mut self, fd: RawFd) {
        if self.timeout_ms > 0 {
            self.timer.adjust(fd, self.timeout_ms);
        }
    }

    fn close_by_fd(&mut self, fd: RawFd) {
        let Some(conn) = self.users.get(&fd) else {
            return;
        };
        close_conn(&self.epoller, conn);
    }
}

/// The single close path: deregister, then idempotent teardown. Safe to
/// call from the reactor (eviction, hangup) and from workers (I/O errors);
/// a late call for an already-closed slot is a no-op.
fn close_conn(epoller: &Epoller, conn: &Mutex<HttpConn>) {
    let mut client = conn.lock().unwrap();
    close_locked(&mut client, epoller);
}

fn close_locked(client: &mut HttpConn, epoller: &Epoller) {
    if client.is_closed() {
        return;
    }
    info!("Client[{}] quit!", client.fd());
    if let Err(e) = epoller.del_fd(client.fd()) {
        debug!("epoll del failed: {e}");
    }
    client.close();
}

/// # Logic Steps
/// 1. Drain the socket into the connection's read buffer.
/// 2. Peer close or a hard error tears the connection down.
/// 3. Otherwise hand the buffered bytes to the request processor.
fn on_read(conn: &Mutex<HttpConn>, epoller: &Epoller, verifier: &dyn UserVerifier, conn_event: u32) {
    let mut client = conn.lock().unwrap();
    if client.is_closed() {
        return;
    }
    match client.read() {
        Ok(0) => close_locked(&mut client, epoller),
        Ok(_) => on_process(&mut client, epoller, verifier, conn_event),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            on_process(&mut client, epoller, verifier, conn_event)
        }
        Err(_) => close_locked(&mut client, epoller),
    }
}

/// Re-arms the one-shot registration for write when a response is ready
/// and for read while the request is still incomplete. This runs on the
/// worker right before the task returns, so the next event for this
/// descriptor cannot be dispatched before the worker is done with it.
fn on_process(
    client: &mut HttpConn,
    epoller: &Epoller,
    verifier: &dyn UserVerifier,
    conn_event: u32,
) {
    let interest = if client.process(verifier) {
        EPOLL_OUT
    } else {
        EPOLL_IN
    };
    if let Err(e) = epoller.mod_fd(client.fd(), conn_event | interest) {
        warn!("epoll mod failed: {e}");
        close_locked(client, epoller);
    }
}

/// # Logic Steps
/// 1. Flush the header and file segments.
/// 2. Transfer complete: keep-alive connections go straight back to the
///    processor (pipelined bytes may already be buffered), others close.
/// 3. `WouldBlock` with bytes remaining re-arms for write.
/// 4. Anything else is fatal.
fn on_write(
    conn: &Mutex<HttpConn>,
    epoller: &Epoller,
    verifier: &dyn UserVerifier,
    conn_event: u32,
) {
    let mut client = conn.lock().unwrap();
    if client.is_closed() {
        return;
    }
    let ret = client.write();
    if client.to_write_bytes() == 0 {
        if client.is_keep_alive() {
            on_process(&mut client, epoller, verifier, conn_event);
            return;
        }
    } else if let Err(e) = &ret {
        if e.kind() == io::ErrorKind::WouldBlock {
            if let Err(e) = epoller.mod_fd(client.fd(), conn_event | EPOLL_OUT) {
                warn!("epoll mod failed: {e}");
                close_locked(&mut client, epoller);
            }
            return;
        }
    }
    close_locked(&mut client, epoller);
}
