//! Node server with event-driven I/O
//!
//! Thread layout:
//!
//! ```text
//!              ┌──────────────┐   crossbeam channel + waker
//! listener ──► │   acceptor   │ ──────────────┬──────────────┐
//!              └──────────────┘               ▼              ▼
//!                                     ┌────────────┐  ┌────────────┐
//!                                     │  worker 0  │  │  worker 1  │ ...
//!                                     │ mio Poll   │  │ mio Poll   │
//!                                     │ sessions   │  │ sessions   │
//!                                     └────────────┘  └────────────┘
//! ```
//!
//! A connection is pinned to one worker for its whole life, so its session is
//! only ever decoded by that worker's thread. Workers never share sessions and
//! run in parallel.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use super::connection::{Connection, ConnectionState, MessageHandler};
use super::session::{Session, SessionId};
use super::stats::{NodeStats, StatsSnapshot};
use crate::config::NodeConfig;
use crate::error::{Result, WireError};
use crate::protocol::Parser;

const LISTENER: Token = Token(0);
const ACCEPT_WAKER: Token = Token(1);
const WORKER_WAKER: Token = Token(0);
const FIRST_CONNECTION: usize = 1;
const EVENTS_CAPACITY: usize = 1024;

/// Socket handed from the acceptor to a worker.
struct Accepted {
    id: SessionId,
    stream: TcpStream,
    addr: SocketAddr,
}

struct WorkerLink {
    tx: Sender<Accepted>,
    waker: Arc<Waker>,
}

/// Running server; dropping it leaves the threads running.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    wakers: Vec<Arc<Waker>>,
    threads: Vec<JoinHandle<()>>,
    stats: Arc<NodeStats>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting, close every connection and wait for the threads.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        for waker in &self.wakers {
            if let Err(e) = waker.wake() {
                warn!(error = %e, "failed to wake server thread");
            }
        }
        self.join();
    }

    /// Block until the server stops.
    pub fn join(self) {
        for handle in self.threads {
            if handle.join().is_err() {
                error!("server thread panicked");
            }
        }
    }
}

/// Bind the listener and spawn the acceptor and worker threads.
pub fn start<P, H>(config: &NodeConfig, parser: Arc<P>, handler: Arc<H>) -> Result<ServerHandle>
where
    P: Parser + Send + Sync + 'static,
    H: MessageHandler<P::Output>,
{
    config.validate()?;

    let accept_poll = Poll::new()?;
    let mut listener = TcpListener::bind(config.bind_addr)?;
    let local_addr = listener.local_addr()?;
    accept_poll
        .registry()
        .register(&mut listener, LISTENER, Interest::READABLE)?;
    let accept_waker = Arc::new(Waker::new(accept_poll.registry(), ACCEPT_WAKER)?);

    let shutdown = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(NodeStats::new());
    let mut wakers = vec![accept_waker];
    let mut links = Vec::with_capacity(config.workers);
    let mut threads = Vec::with_capacity(config.workers + 1);

    for index in 0..config.workers {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WORKER_WAKER)?);
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = Worker {
            index,
            poll,
            rx,
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION,
            parser: Arc::clone(&parser),
            handler: Arc::clone(&handler),
            stats: Arc::clone(&stats),
            shutdown: Arc::clone(&shutdown),
            read_buffer_size: config.read_buffer_size,
            poll_timeout: config.poll_timeout(),
        };
        let spawned = thread::Builder::new()
            .name(format!("gridwire-worker-{}", index))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                abort_startup(&shutdown, &wakers);
                return Err(e.into());
            }
        }

        wakers.push(Arc::clone(&waker));
        links.push(WorkerLink { tx, waker });
    }

    let acceptor = Acceptor {
        poll: accept_poll,
        listener,
        links,
        next_worker: 0,
        next_id: 1,
        stats: Arc::clone(&stats),
        shutdown: Arc::clone(&shutdown),
        max_connections: config.max_connections as u64,
        socket_recv_buffer: config.socket_recv_buffer,
        poll_timeout: config.poll_timeout(),
        stats_interval: config.stats_interval(),
    };
    let spawned = thread::Builder::new()
        .name("gridwire-acceptor".to_string())
        .spawn(move || acceptor.run());
    match spawned {
        Ok(handle) => threads.push(handle),
        Err(e) => {
            abort_startup(&shutdown, &wakers);
            return Err(e.into());
        }
    }

    info!(%local_addr, workers = config.workers, "node listening");

    Ok(ServerHandle {
        local_addr,
        shutdown,
        wakers,
        threads,
        stats,
    })
}

fn abort_startup(shutdown: &AtomicBool, wakers: &[Arc<Waker>]) {
    shutdown.store(true, Ordering::Release);
    for waker in wakers {
        let _ = waker.wake();
    }
}

struct Acceptor {
    poll: Poll,
    listener: TcpListener,
    links: Vec<WorkerLink>,
    next_worker: usize,
    next_id: u64,
    stats: Arc<NodeStats>,
    shutdown: Arc<AtomicBool>,
    max_connections: u64,
    socket_recv_buffer: Option<usize>,
    poll_timeout: Duration,
    stats_interval: Option<Duration>,
}

impl Acceptor {
    fn run(mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let started = Instant::now();
        let mut last_stats = Instant::now();

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "acceptor poll failed");
                break;
            }

            for event in events.iter() {
                if event.token() == LISTENER {
                    self.accept_connections();
                }
            }

            if let Some(interval) = self.stats_interval {
                if last_stats.elapsed() >= interval {
                    self.stats.log(started.elapsed());
                    last_stats = Instant::now();
                }
            }
        }

        debug!("acceptor stopped");
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.dispatch(stream, addr),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.stats.active_connections() >= self.max_connections {
            warn!(peer = %addr, "max connections reached, rejecting");
            self.stats.connection_rejected();
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %addr, error = %e, "TCP_NODELAY not applied");
        }
        #[cfg(unix)]
        {
            if let Some(size) = self.socket_recv_buffer {
                set_recv_buffer(&stream, size);
            }
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        let index = self.next_worker;
        self.next_worker = (self.next_worker + 1) % self.links.len();

        self.stats.connection_opened();
        let link = &self.links[index];
        if link.tx.send(Accepted { id, stream, addr }).is_err() {
            warn!(session = %id, worker = index, "worker gone, dropping connection");
            self.stats.connection_closed();
            return;
        }
        if let Err(e) = link.waker.wake() {
            warn!(worker = index, error = %e, "failed to wake worker");
        }
        debug!(session = %id, peer = %addr, worker = index, "connection accepted");
    }
}

/// Larger kernel receive buffer for bursty peers.
#[cfg(unix)]
fn set_recv_buffer(stream: &TcpStream, size: usize) {
    use std::os::unix::io::AsRawFd;

    let optval = size.min(libc::c_int::MAX as usize) as libc::c_int;
    // SAFETY: the fd is owned by `stream` for the duration of the call and
    // optval points to a live c_int of the advertised size.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        debug!(error = %io::Error::last_os_error(), "SO_RCVBUF not applied");
    }
}

struct Worker<P, H> {
    index: usize,
    poll: Poll,
    rx: Receiver<Accepted>,
    connections: HashMap<Token, Connection<TcpStream>>,
    next_token: usize,
    parser: Arc<P>,
    handler: Arc<H>,
    stats: Arc<NodeStats>,
    shutdown: Arc<AtomicBool>,
    read_buffer_size: usize,
    poll_timeout: Duration,
}

impl<P, H> Worker<P, H>
where
    P: Parser,
    H: MessageHandler<P::Output>,
{
    fn run(mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(worker = self.index, error = %e, "worker poll failed");
                break;
            }

            for event in events.iter() {
                match event.token() {
                    WORKER_WAKER => {}
                    token => self.handle_ready(token),
                }
            }

            self.register_pending();
        }

        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.close(token, None);
        }
        debug!(worker = self.index, "worker stopped");
    }

    fn register_pending(&mut self) {
        while let Ok(Accepted {
            id,
            mut stream,
            addr,
        }) = self.rx.try_recv()
        {
            let token = Token(self.next_token);
            self.next_token += 1;

            if let Err(e) = self
                .poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)
            {
                warn!(session = %id, error = %e, "failed to register connection");
                self.stats.connection_closed();
                continue;
            }

            let session = Session::with_peer(id, addr);
            self.connections
                .insert(token, Connection::new(stream, session, self.read_buffer_size));

            // Bytes may have arrived before registration.
            self.handle_ready(token);
        }
    }

    fn handle_ready(&mut self, token: Token) {
        let conn = match self.connections.get_mut(&token) {
            Some(conn) => conn,
            None => return,
        };

        let bytes_before = conn.bytes_read();
        let messages_before = conn.session().messages_decoded();
        let result = conn.pump(self.parser.as_ref(), self.handler.as_ref());
        // Count progress even when the pump ended in an error.
        self.stats.record_read(
            conn.bytes_read() - bytes_before,
            conn.session().messages_decoded() - messages_before,
        );

        match result {
            Ok(pumped) => {
                if pumped.state == ConnectionState::Closed {
                    self.close(token, None);
                }
            }
            Err(WireError::Io(e)) => {
                debug!(worker = self.index, error = %e, "connection read failed");
                self.close(token, Some(WireError::Io(e)));
            }
            Err(e) => {
                warn!(worker = self.index, error = %e, "decode failed, closing connection");
                self.stats.decode_error();
                self.close(token, Some(e));
            }
        }
    }

    fn close(&mut self, token: Token, error: Option<WireError>) {
        let mut conn = match self.connections.remove(&token) {
            Some(conn) => conn,
            None => return,
        };

        if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
            debug!(error = %e, "deregister failed");
        }
        self.stats.connection_closed();
        self.handler.on_closed(conn.session(), error.as_ref());

        let session = conn.session();
        debug!(
            session = %session.id(),
            peer = ?session.peer(),
            decoded = session.messages_decoded(),
            age_ms = session.age().as_millis() as u64,
            "connection closed"
        );
    }
}
