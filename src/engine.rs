//! Engine lifecycle: binds the listeners, spins up the loop pool, keeps the
//! process-wide registry of running engines, and coordinates graceful
//! shutdown.

use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use lockfree::map::Map;

use crate::addr;
use crate::balancer::Balancer;
use crate::conn::NetAddr;
use crate::error::{Error, Result};
use crate::eventloop::Reactor;
use crate::handler::EventHandler;
use crate::listener::Listener;
use crate::logging::LogLevel;
use crate::options::Options;
use crate::poll::{Poller, Trigger};

/// Running engines keyed by the exact `scheme://addr` string passed to
/// [`run`], so [`stop`] can find them from anywhere in the process.
fn registry() -> &'static Map<String, Arc<EngineShared>> {
    static ENGINES: OnceLock<Map<String, Arc<EngineShared>>> = OnceLock::new();
    ENGINES.get_or_init(Map::new)
}

pub(crate) struct LoopRef {
    pub trigger: Arc<Trigger>,
    pub conn_count: Arc<AtomicUsize>,
}

pub(crate) struct EngineShared {
    pub addr: String,
    pub opts: Options,
    pub handler: Arc<dyn EventHandler>,
    pub loops: Vec<LoopRef>,
    balancer: Balancer,
    shutdown: AtomicBool,
    force_close: AtomicBool,
    stopped: (Mutex<bool>, Condvar),
    listener_fd: RawFd,
}

impl EngineShared {
    /// Requests shutdown once and wakes every loop to observe it.
    pub fn begin_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            for lp in &self.loops {
                lp.trigger.wake();
            }
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// True once a stop deadline has expired; loops abandon in-flight work
    /// and close whatever is still open.
    pub fn force_closing(&self) -> bool {
        self.force_close.load(Ordering::SeqCst)
    }

    pub fn pick_loop(&self, peer: &NetAddr) -> usize {
        let loads: Vec<usize> = self
            .loops
            .iter()
            .map(|lp| lp.conn_count.load(Ordering::Relaxed))
            .collect();
        self.balancer.pick(&loads, peer.to_string().as_bytes())
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.opts.logger.log(level, message);
    }

    fn mark_stopped(&self) {
        let (lock, cvar) = &self.stopped;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait_stopped(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &self.stopped;
        let deadline = Instant::now() + timeout;
        let mut stopped = lock.lock().unwrap();
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = cvar.wait_timeout(stopped, deadline - now).unwrap();
            stopped = guard;
        }
        true
    }
}

/// Handle to a running engine, handed to `on_boot`/`on_shutdown` and
/// cloneable into other threads.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    pub(crate) fn from_shared(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }

    /// The `scheme://addr` string this engine serves.
    pub fn addr(&self) -> &str {
        &self.shared.addr
    }

    /// Live connections across all loops.
    pub fn count_connections(&self) -> usize {
        self.shared
            .loops
            .iter()
            .map(|lp| lp.conn_count.load(Ordering::Relaxed))
            .sum()
    }

    /// Duplicates the primary listening descriptor. The returned fd has its
    /// own lifetime, independent of the engine.
    pub fn dup_fd(&self) -> Result<OwnedFd> {
        let fd = unsafe { BorrowedFd::borrow_raw(self.shared.listener_fd) };
        Ok(fd.try_clone_to_owned()?)
    }

    /// Requests graceful shutdown and waits for the engine to finish, up to
    /// `timeout`. When the deadline expires the remaining connections are
    /// force-closed: loops drop in-flight work and deliver `on_close` with
    /// a [`Error::StopTimeout`] cause. Repeated calls after the first fail
    /// with [`Error::EngineInShutdown`]. Must not be called from a loop
    /// thread; return [`crate::Action::Shutdown`] from a callback instead.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return Err(Error::EngineInShutdown);
        }
        for lp in &self.shared.loops {
            lp.trigger.wake();
        }
        if self.shared.wait_stopped(timeout) {
            return Ok(());
        }
        // Deadline expired: switch to forced teardown and wake every loop
        // so it is observed immediately.
        self.shared.force_close.store(true, Ordering::SeqCst);
        for lp in &self.shared.loops {
            lp.trigger.wake();
        }
        Err(Error::StopTimeout)
    }
}

/// Serves `addr` with `handler` until the engine shuts down.
///
/// Binding and validation failures return before any loop starts. The call
/// then blocks; it returns after a shutdown requested through
/// [`Engine::stop`], [`stop`], or [`crate::Action::Shutdown`] has completed
/// and `on_shutdown` has run.
pub fn run<H: EventHandler>(handler: H, addr: &str, opts: Options) -> Result<()> {
    let (proto, raw_addr) = addr::parse(addr)?;
    opts.validate()?;
    if registry().get(&addr.to_string()).is_some() {
        return Err(Error::AddressInUse(addr.to_string()));
    }

    let loop_count = opts.loop_count();
    let handler: Arc<dyn EventHandler> = Arc::new(handler);

    let mut pollers = Vec::with_capacity(loop_count);
    for _ in 0..loop_count {
        pollers.push(Poller::new()?);
    }
    let loops: Vec<LoopRef> = pollers
        .iter()
        .map(|p| LoopRef {
            trigger: p.trigger(),
            conn_count: Arc::new(AtomicUsize::new(0)),
        })
        .collect();

    // Under port reuse every loop binds its own listener and the kernel
    // balances accepts; otherwise loop 0 hosts the only listener and the
    // balancer places connections.
    let per_loop_listeners = opts.reuse_port && !proto.is_unix();
    let mut listeners: Vec<Option<Listener>> = Vec::with_capacity(loop_count);
    for idx in 0..loop_count {
        if idx == 0 || per_loop_listeners {
            listeners.push(Some(Listener::bind(proto, raw_addr, &opts)?));
        } else {
            listeners.push(None);
        }
    }
    let listener_fd = listeners[0].as_ref().unwrap().raw_fd();

    let shared = Arc::new(EngineShared {
        addr: addr.to_string(),
        balancer: Balancer::new(opts.load_balancing),
        opts,
        handler,
        loops,
        shutdown: AtomicBool::new(false),
        force_close: AtomicBool::new(false),
        stopped: (Mutex::new(false), Condvar::new()),
        listener_fd,
    });
    let _ = registry().insert(addr.to_string(), Arc::clone(&shared));

    let mut handles = Vec::with_capacity(loop_count);
    for (idx, (poller, listener)) in pollers.into_iter().zip(listeners).enumerate() {
        let mut reactor = Reactor::new(idx, poller, listener, Arc::clone(&shared));
        let spawned = thread::Builder::new()
            .name(format!("surge-loop-{idx}"))
            .spawn(move || reactor.run());
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                shared.begin_shutdown();
                for handle in handles {
                    let _ = handle.join();
                }
                shared.mark_stopped();
                let _ = registry().remove(&addr.to_string());
                return Err(Error::Io(e));
            }
        }
    }

    for handle in handles {
        let _ = handle.join();
    }

    let engine = Engine::from_shared(Arc::clone(&shared));
    shared.handler.on_shutdown(&engine);
    shared.mark_stopped();
    let _ = registry().remove(&addr.to_string());
    Ok(())
}

/// Gracefully stops the engine bound to `addr`, waiting up to `timeout`.
pub fn stop(addr: &str, timeout: Duration) -> Result<()> {
    let shared = registry()
        .get(&addr.to_string())
        .map(|guard| Arc::clone(guard.val()))
        .ok_or_else(|| Error::EngineNotRunning(addr.to_string()))?;
    Engine::from_shared(shared).stop(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::LoadBalancing;
    use crate::conn::{Conn, ConnHandle};
    use crate::handler::Action;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Wraps a handler so tests get the [`Engine`] once the loops are up.
    struct WithBoot<H> {
        inner: H,
        tx: Mutex<mpsc::Sender<Engine>>,
    }

    impl<H: EventHandler> EventHandler for WithBoot<H> {
        fn on_boot(&self, engine: &Engine) -> Action {
            let _ = self.tx.lock().unwrap().send(engine.clone());
            self.inner.on_boot(engine)
        }
        fn on_shutdown(&self, engine: &Engine) {
            self.inner.on_shutdown(engine);
        }
        fn on_open(&self, conn: &mut Conn) -> (Option<Vec<u8>>, Action) {
            self.inner.on_open(conn)
        }
        fn on_close(&self, conn: &mut Conn, err: Option<&Error>) -> Action {
            self.inner.on_close(conn, err)
        }
        fn on_traffic(&self, conn: &mut Conn) -> Action {
            self.inner.on_traffic(conn)
        }
        fn on_tick(&self) -> (Duration, Action) {
            self.inner.on_tick()
        }
    }

    fn start<H: EventHandler>(
        handler: H,
        addr: &str,
        opts: Options,
    ) -> (Engine, thread::JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel();
        let wrapped = WithBoot {
            inner: handler,
            tx: Mutex::new(tx),
        };
        let addr = addr.to_string();
        let server = thread::spawn(move || run(wrapped, &addr, opts));
        let engine = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("engine did not boot");
        (engine, server)
    }

    fn test_opts() -> Options {
        Options::builder().reuse_addr(true).build()
    }

    fn connect(addr: &str) -> TcpStream {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    /// Echoes every inbound chunk, optionally greeting new connections.
    struct Echo {
        greeting: Option<&'static [u8]>,
    }

    impl EventHandler for Echo {
        fn on_open(&self, _conn: &mut Conn) -> (Option<Vec<u8>>, Action) {
            (self.greeting.map(|g| g.to_vec()), Action::None)
        }
        fn on_traffic(&self, conn: &mut Conn) -> Action {
            let data = conn.next(None).unwrap().to_vec();
            let _ = conn.write(&data);
            Action::None
        }
    }

    #[test]
    fn tcp_echo_round_trip() {
        let addr = "tcp://127.0.0.1:19901";
        let (engine, server) = start(Echo { greeting: Some(b"sweetness\r\n") }, addr, test_opts());

        for _ in 0..4 {
            let mut client = connect("127.0.0.1:19901");
            let mut greeting = [0u8; 11];
            client.read_exact(&mut greeting).unwrap();
            assert_eq!(&greeting, b"sweetness\r\n");

            for round in 0..16usize {
                let chunk: Vec<u8> = (0..4096usize)
                    .map(|i| ((i * 31 + round * 7) % 251) as u8)
                    .collect();
                client.write_all(&chunk).unwrap();
                let mut back = vec![0u8; chunk.len()];
                client.read_exact(&mut back).unwrap();
                assert_eq!(back, chunk);
            }
        }

        let fd = engine.dup_fd().unwrap();
        drop(fd);

        engine.stop(Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();
    }

    #[test]
    fn multi_loop_echo_with_least_connections() {
        let addr = "tcp://127.0.0.1:19902";
        let opts = Options::builder()
            .reuse_addr(true)
            .num_event_loops(3)
            .load_balancing(LoadBalancing::LeastConnections)
            .build();
        let (engine, server) = start(Echo { greeting: None }, addr, opts);

        let mut clients = Vec::new();
        for _ in 0..6 {
            let mut client = connect("127.0.0.1:19902");
            client.write_all(b"ping").unwrap();
            let mut back = [0u8; 4];
            client.read_exact(&mut back).unwrap();
            assert_eq!(&back, b"ping");
            clients.push(client);
        }

        let mut live = 0;
        for _ in 0..100 {
            live = engine.count_connections();
            if live == 6 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(live, 6);

        // Six sequential accepts over three idle loops must spread evenly.
        let per_loop: Vec<usize> = engine
            .shared
            .loops
            .iter()
            .map(|lp| lp.conn_count.load(Ordering::SeqCst))
            .collect();
        assert!(
            per_loop.iter().all(|&count| count == 2),
            "per-loop spread was {per_loop:?}"
        );

        drop(clients);
        engine.stop(Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();
    }

    /// Decodes magic + length framed messages and echoes each frame back
    /// through one vectored write.
    struct FrameEcho;

    const FRAME_MAGIC: [u8; 2] = [0x05, 0x22];

    impl EventHandler for FrameEcho {
        fn on_traffic(&self, conn: &mut Conn) -> Action {
            loop {
                if conn.inbound_buffered() < 6 {
                    return Action::None;
                }
                let mut header = [0u8; 6];
                let mut filled = 0;
                for slice in conn.peek(Some(6)) {
                    header[filled..filled + slice.len()].copy_from_slice(slice);
                    filled += slice.len();
                }
                assert_eq!(header[..2], FRAME_MAGIC);
                let body_len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
                if conn.inbound_buffered() < 6 + body_len {
                    return Action::None;
                }
                let frame = conn.next(Some(6 + body_len)).unwrap().to_vec();
                let _ = conn.writev(&[&frame[..6], &frame[6..]]);
            }
        }
    }

    fn encode_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(6 + body.len());
        frame.extend_from_slice(&FRAME_MAGIC);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);
        frame
    }

    #[test]
    fn length_prefixed_frames_round_trip() {
        let addr = "tcp://127.0.0.1:19903";
        let (engine, server) = start(FrameEcho, addr, test_opts());

        let mut client = connect("127.0.0.1:19903");
        let mut sent = Vec::new();
        for i in 0..40u8 {
            let body: Vec<u8> = (0..200u8).map(|j| j.wrapping_add(i)).collect();
            let frame = encode_frame(&body);
            client.write_all(&frame).unwrap();
            sent.extend_from_slice(&frame);
        }
        let mut received = vec![0u8; sent.len()];
        client.read_exact(&mut received).unwrap();
        assert_eq!(received, sent);

        engine.stop(Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();
    }

    /// Echoes once, then asks for the connection to be closed.
    struct CloseAfterEcho {
        closed: Arc<AtomicUsize>,
        clean: Arc<AtomicBool>,
    }

    impl EventHandler for CloseAfterEcho {
        fn on_traffic(&self, conn: &mut Conn) -> Action {
            let data = conn.next(None).unwrap().to_vec();
            let _ = conn.write(&data);
            Action::Close
        }
        fn on_close(&self, _conn: &mut Conn, err: Option<&Error>) -> Action {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if err.is_none() {
                self.clean.store(true, Ordering::SeqCst);
            }
            Action::None
        }
    }

    #[test]
    fn close_action_flushes_then_closes() {
        let addr = "tcp://127.0.0.1:19904";
        let closed = Arc::new(AtomicUsize::new(0));
        let clean = Arc::new(AtomicBool::new(false));
        let handler = CloseAfterEcho {
            closed: Arc::clone(&closed),
            clean: Arc::clone(&clean),
        };
        let (engine, server) = start(handler, addr, test_opts());

        let mut client = connect("127.0.0.1:19904");
        client.write_all(b"Hello World!").unwrap();
        let mut back = [0u8; 12];
        client.read_exact(&mut back).unwrap();
        assert_eq!(&back, b"Hello World!");
        let mut probe = [0u8; 1];
        assert_eq!(client.read(&mut probe).unwrap(), 0, "peer should see EOF");

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(clean.load(Ordering::SeqCst), "close cause should be empty");

        engine.stop(Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();
    }

    /// Publishes each connection's handle and counts byte-less callbacks.
    struct WakeProbe {
        handle_tx: Mutex<mpsc::Sender<ConnHandle>>,
        empty_traffic: Arc<AtomicUsize>,
    }

    impl EventHandler for WakeProbe {
        fn on_open(&self, conn: &mut Conn) -> (Option<Vec<u8>>, Action) {
            let _ = self.handle_tx.lock().unwrap().send(conn.handle());
            (None, Action::None)
        }
        fn on_traffic(&self, conn: &mut Conn) -> Action {
            if conn.inbound_buffered() == 0 {
                self.empty_traffic.fetch_add(1, Ordering::SeqCst);
            }
            Action::None
        }
    }

    #[test]
    fn wake_fires_traffic_without_bytes() {
        let addr = "tcp://127.0.0.1:19905";
        let (handle_tx, handle_rx) = mpsc::channel();
        let empty_traffic = Arc::new(AtomicUsize::new(0));
        let handler = WakeProbe {
            handle_tx: Mutex::new(handle_tx),
            empty_traffic: Arc::clone(&empty_traffic),
        };
        let (engine, server) = start(handler, addr, test_opts());

        let _client = connect("127.0.0.1:19905");
        let handle = handle_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.wake().unwrap();

        let mut seen = 0;
        for _ in 0..100 {
            seen = empty_traffic.load(Ordering::SeqCst);
            if seen == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(seen, 1);

        engine.stop(Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();
    }

    /// Offloads the echo to another thread which answers through the
    /// connection handle with a two-slice vectored write.
    struct AsyncEcho;

    impl EventHandler for AsyncEcho {
        fn on_traffic(&self, conn: &mut Conn) -> Action {
            let mut data = Vec::new();
            conn.write_to(&mut data).unwrap();
            let handle = conn.handle();
            thread::spawn(move || {
                let mid = data.len() / 2;
                handle.async_writev(&[&data[..mid], &data[mid..]]).unwrap();
            });
            Action::None
        }
    }

    #[test]
    fn async_writev_echo_round_trip() {
        let addr = "tcp://127.0.0.1:19909";
        let (engine, server) = start(AsyncEcho, addr, test_opts());

        let mut client = connect("127.0.0.1:19909");
        for round in 0..8u8 {
            let chunk: Vec<u8> = (0..2048usize)
                .map(|i| (i as u8).wrapping_mul(3).wrapping_add(round))
                .collect();
            client.write_all(&chunk).unwrap();
            let mut back = vec![0u8; chunk.len()];
            client.read_exact(&mut back).unwrap();
            assert_eq!(back, chunk);
        }

        engine.stop(Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();
    }

    struct Silent;
    impl EventHandler for Silent {}

    #[test]
    fn stop_with_deadline_closes_pending_reads() {
        let addr = "tcp://127.0.0.1:19906";
        let (engine, server) = start(Silent, addr, test_opts());

        let mut client = connect("127.0.0.1:19906");
        let started = Instant::now();
        engine.stop(Duration::from_secs(3)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));

        let mut probe = [0u8; 1];
        match client.read(&mut probe) {
            Ok(0) => {}
            Ok(n) => panic!("unexpected {n} bytes after shutdown"),
            Err(_) => {}
        }

        assert!(matches!(
            engine.stop(Duration::from_secs(1)),
            Err(Error::EngineInShutdown)
        ));
        server.join().unwrap().unwrap();
        assert!(matches!(
            stop(addr, Duration::from_secs(1)),
            Err(Error::EngineNotRunning(_))
        ));
    }

    /// Records that stream-only callbacks stay silent for datagrams.
    struct UdpEcho {
        closed: Arc<AtomicUsize>,
    }

    impl EventHandler for UdpEcho {
        fn on_traffic(&self, conn: &mut Conn) -> Action {
            let data = conn.next(None).unwrap().to_vec();
            let _ = conn.write(&data);
            Action::None
        }
        fn on_close(&self, _conn: &mut Conn, _err: Option<&Error>) -> Action {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Action::None
        }
    }

    #[test]
    fn udp_echo_addresses_each_sender() {
        let addr = "udp://127.0.0.1:19907";
        let closed = Arc::new(AtomicUsize::new(0));
        let (engine, server) = start(
            UdpEcho {
                closed: Arc::clone(&closed),
            },
            addr,
            test_opts(),
        );

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        for i in 0..5u8 {
            let payload = vec![i; 512];
            client.send_to(&payload, "127.0.0.1:19907").unwrap();
            let mut back = [0u8; 1024];
            let (n, _) = client.recv_from(&mut back).unwrap();
            assert_eq!(&back[..n], payload.as_slice());
        }
        assert_eq!(closed.load(Ordering::SeqCst), 0, "udp never sees on_close");

        engine.stop(Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();
    }

    #[test]
    fn unix_echo_round_trip() {
        let path = std::env::temp_dir().join(format!("surge-engine-{}.sock", std::process::id()));
        let addr = format!("unix://{}", path.display());
        let (engine, server) = start(Echo { greeting: None }, &addr, test_opts());

        let mut client = std::os::unix::net::UnixStream::connect(&path).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"over the socket file").unwrap();
        let mut back = [0u8; 20];
        client.read_exact(&mut back).unwrap();
        assert_eq!(&back, b"over the socket file");

        engine.stop(Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();
        assert!(!path.exists(), "socket file should be unlinked on shutdown");
    }

    #[test]
    fn run_rejects_unknown_scheme() {
        let result = run(Silent, "quic://127.0.0.1:19908", Options::default());
        assert!(matches!(result, Err(Error::UnsupportedProtocol(_))));
    }

    #[test]
    fn second_engine_on_same_address_is_rejected() {
        let addr = "tcp://127.0.0.1:19910";
        let (engine, server) = start(Silent, addr, test_opts());
        assert!(matches!(
            run(Silent, addr, test_opts()),
            Err(Error::AddressInUse(_))
        ));
        engine.stop(Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();
    }

    struct AbortOnBoot;
    impl EventHandler for AbortOnBoot {
        fn on_boot(&self, _engine: &Engine) -> Action {
            Action::Shutdown
        }
    }

    #[test]
    fn shutdown_from_on_boot_aborts_startup() {
        let result = run(AbortOnBoot, "tcp://127.0.0.1:19911", test_opts());
        assert!(result.is_ok());
    }

    /// Counts ticks and shuts the engine down from the ticker itself.
    struct TickCounter {
        ticks: Arc<AtomicUsize>,
    }

    impl EventHandler for TickCounter {
        fn on_tick(&self) -> (Duration, Action) {
            let seen = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if seen >= 3 {
                (Duration::from_millis(10), Action::Shutdown)
            } else {
                (Duration::from_millis(10), Action::None)
            }
        }
    }

    #[test]
    fn ticker_fires_and_can_shut_down() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let opts = Options::builder().reuse_addr(true).ticker(true).build();
        let handler = TickCounter {
            ticks: Arc::clone(&ticks),
        };
        let result = run(handler, "tcp://127.0.0.1:19912", opts);
        assert!(result.is_ok());
        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }
}
