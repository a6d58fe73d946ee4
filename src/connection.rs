use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::proto::{Command, Frame, LineDecoder, ParseError, Record, format_command};
use crate::stats::RxStats;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
    #[error("connection already closed; create a new one to reconnect")]
    Closed,
}

type RecordHandler = Box<dyn FnMut(&Record)>;
type ErrorHandler = Box<dyn FnMut(&ConnectionError)>;
type CloseHandler = Box<dyn FnMut()>;

struct Shared {
    host: String,
    port: u16,
    debug: bool,
    stats_interval: Duration,
    state: Cell<ConnectionState>,
    outgoing: RefCell<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    reader: RefCell<Option<JoinHandle<()>>>,
    record_handlers: RefCell<Vec<RecordHandler>>,
    error_handlers: RefCell<Vec<ErrorHandler>>,
    close_handlers: RefCell<Vec<CloseHandler>>,
    stats: RefCell<RxStats>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// Line-oriented link to the tracker server.
///
/// Cloning yields another handle to the same link. Background I/O runs as
/// local tasks, so every method that starts I/O must be called inside a
/// [`tokio::task::LocalSet`]. Handlers run on that same thread, in arrival
/// order, and must not register further handlers while being dispatched.
#[derive(Clone)]
pub struct Connection {
    shared: Rc<Shared>,
}

impl Connection {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                host: config.host.clone(),
                port: config.port,
                debug: config.debug,
                stats_interval: config.stats_interval,
                state: Cell::new(ConnectionState::Disconnected),
                outgoing: RefCell::new(None),
                reader: RefCell::new(None),
                record_handlers: RefCell::new(Vec::new()),
                error_handlers: RefCell::new(Vec::new()),
                close_handlers: RefCell::new(Vec::new()),
                stats: RefCell::new(RxStats::new()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn stats(&self) -> RxStats {
        self.shared.stats.borrow().clone()
    }

    /// Records are delivered to handlers in registration order.
    pub fn on_record(&self, handler: impl FnMut(&Record) + 'static) {
        self.shared
            .record_handlers
            .borrow_mut()
            .push(Box::new(handler));
    }

    pub fn on_error(&self, handler: impl FnMut(&ConnectionError) + 'static) {
        self.shared
            .error_handlers
            .borrow_mut()
            .push(Box::new(handler));
    }

    pub fn on_close(&self, handler: impl FnMut() + 'static) {
        self.shared
            .close_handlers
            .borrow_mut()
            .push(Box::new(handler));
    }

    /// Open the TCP stream. A failure leaves the connection `Closed`; it is
    /// reported to the error hooks and returned, never retried. A `close`
    /// issued while the connect is in flight wins: the new stream is dropped.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting | ConnectionState::Connected => {
                warn!("[conn] connect called twice, ignoring");
                return Ok(());
            }
            ConnectionState::Closed => return Err(ConnectionError::Closed),
        }

        self.shared.state.set(ConnectionState::Connecting);
        let addr = (self.shared.host.as_str(), self.shared.port);
        match TcpStream::connect(addr).await {
            Ok(_) if self.state() != ConnectionState::Connecting => {
                info!("[conn] closed while connecting, dropping the stream");
                Err(ConnectionError::Closed)
            }
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("[conn] set_nodelay: {}", e);
                }
                info!(host = %self.shared.host, port = self.shared.port, "[conn] connected");
                self.attach(stream);
                Ok(())
            }
            Err(e) => {
                error!(
                    host = %self.shared.host,
                    port = self.shared.port,
                    "[conn] connect failed: {}",
                    e
                );
                let err = ConnectionError::Socket(e);
                self.emit_error(&err);
                self.mark_closed();
                Err(err)
            }
        }
    }

    /// Drive the connection over an already-open byte stream.
    pub fn attach<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.outgoing.borrow_mut() = Some(tx);
        self.shared.state.set(ConnectionState::Connected);

        let weak = Rc::downgrade(&self.shared);
        tokio::task::spawn_local(write_loop(weak.clone(), write_half, rx));
        let reader = tokio::task::spawn_local(read_loop(weak, read_half));
        *self.shared.reader.borrow_mut() = Some(reader);
    }

    /// Queue bytes for the socket. Writes leave in call order.
    pub fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            debug!("[conn] send while {:?}", self.state());
            return Err(ConnectionError::NotConnected);
        }
        let outgoing = self.shared.outgoing.borrow();
        let tx = outgoing.as_ref().ok_or(ConnectionError::NotConnected)?;
        if self.shared.debug {
            debug!("[tx] {}", String::from_utf8_lossy(bytes).trim_end());
        }
        tx.send(bytes.to_vec())
            .map_err(|_| ConnectionError::NotConnected)
    }

    pub fn send_command(&self, cmd: &Command) -> Result<(), ConnectionError> {
        self.send(format_command(cmd).as_bytes())
    }

    /// Idempotent. Only a connected link gets its socket shut down.
    pub fn close(&self) {
        if self.is_connected() {
            info!("[conn] closing");
            if let Some(reader) = self.shared.reader.borrow_mut().take() {
                reader.abort();
            }
        }
        self.mark_closed();
    }

    /* -------------------- internals -------------------- */

    fn mark_closed(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.shared.state.set(ConnectionState::Closed);
        // Dropping the sender lets the writer flush what is queued, then shut down.
        self.shared.outgoing.borrow_mut().take();
        for handler in self.shared.close_handlers.borrow_mut().iter_mut() {
            handler();
        }
    }

    fn emit_error(&self, err: &ConnectionError) {
        for handler in self.shared.error_handlers.borrow_mut().iter_mut() {
            handler(err);
        }
    }

    fn fail(&self, e: std::io::Error) {
        error!("[conn] socket error: {}", e);
        self.emit_error(&ConnectionError::Socket(e));
        self.mark_closed();
    }

    fn on_bytes(&self, decoder: &mut LineDecoder, bytes: &[u8]) {
        self.shared.stats.borrow_mut().add_bytes(bytes.len());
        for frame in decoder.feed(bytes) {
            match frame {
                Frame::Record(record) => {
                    if self.shared.debug {
                        debug!("[rx] {:?}", record);
                    }
                    self.shared.stats.borrow_mut().inc_record();
                    self.dispatch(&record);
                }
                Frame::Empty => self.shared.stats.borrow_mut().inc_ignored(),
                Frame::Blank => {
                    debug!("[rx] blank line");
                    self.shared.stats.borrow_mut().inc_ignored();
                }
                Frame::Command(cmd) => {
                    warn!("[rx] ignoring command from device: {}", cmd.id());
                    self.shared.stats.borrow_mut().inc_ignored();
                }
                Frame::Malformed(bad) => {
                    if let ParseError::UnknownId(id) = &bad.error {
                        warn!("[rx] ignoring unknown id {}", id);
                        self.shared.stats.borrow_mut().inc_ignored();
                    } else {
                        warn!("[rx] {}", bad);
                        self.shared.stats.borrow_mut().inc_malformed();
                    }
                }
            }
        }
        self.shared
            .stats
            .borrow_mut()
            .maybe_log(self.shared.stats_interval);
    }

    fn dispatch(&self, record: &Record) {
        for handler in self.shared.record_handlers.borrow_mut().iter_mut() {
            handler(record);
        }
    }
}

fn upgrade(weak: &Weak<Shared>) -> Option<Connection> {
    weak.upgrade().map(|shared| Connection { shared })
}

async fn read_loop<R: AsyncRead + Unpin>(weak: Weak<Shared>, mut reader: R) {
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut buf).await;
        let Some(conn) = upgrade(&weak) else {
            return;
        };
        match read {
            Ok(0) => {
                info!("[conn] closed by peer");
                conn.mark_closed();
                return;
            }
            Ok(n) => conn.on_bytes(&mut decoder, &buf[..n]),
            Err(e) => {
                conn.fail(e);
                return;
            }
        }
        if conn.state() == ConnectionState::Closed {
            return;
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    weak: Weak<Shared>,
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = rx.recv().await {
        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            if let Some(conn) = upgrade(&weak) {
                conn.fail(e);
            }
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{CommandId, parse_command};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::task::LocalSet;

    fn attached() -> (Connection, DuplexStream) {
        let conn = Connection::new(&ClientConfig::default());
        let (client, device) = tokio::io::duplex(1024);
        conn.attach(client);
        (conn, device)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_before_connect_is_rejected() {
        let conn = Connection::new(&ClientConfig::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(
            conn.send(b"<GET ID=\"TRACKER_DISPLAY\" />\r\n"),
            Err(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn commands_reach_device_in_order() {
        LocalSet::new()
            .run_until(async {
                let (conn, device) = attached();
                assert!(conn.is_connected());
                let first = Command::set(CommandId::CalibrateReset);
                let second = Command::set(CommandId::CalibrateShow).with_state(true);
                conn.send_command(&first).unwrap();
                conn.send_command(&second).unwrap();

                let mut lines = BufReader::new(device).lines();
                let got1 = lines.next_line().await.unwrap().unwrap();
                let got2 = lines.next_line().await.unwrap().unwrap();
                assert_eq!(parse_command(&got1).unwrap(), first);
                assert_eq!(parse_command(&got2).unwrap(), second);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn records_dispatched_in_line_order() {
        LocalSet::new()
            .run_until(async {
                let (conn, mut device) = attached();
                let seen = Rc::new(RefCell::new(Vec::new()));
                let sink = seen.clone();
                conn.on_record(move |r| sink.borrow_mut().push(r.clone()));

                device
                    .write_all(b"<ACK ID=\"ENABLE_SEND_DATA\" STATE=\"1\" />\r\n<REC />\r\n<REC CN")
                    .await
                    .unwrap();
                settle().await;
                device
                    .write_all(b"T=\"7\" />\r\nbogus\r\n<ACK ID=\"NEW_THING\" />\r\n")
                    .await
                    .unwrap();
                settle().await;

                let seen = seen.borrow();
                assert_eq!(seen.len(), 2);
                assert!(matches!(&seen[0], Record::Ack(a) if a.id == CommandId::EnableSendData));
                assert!(matches!(&seen[1], Record::Telemetry(t) if t.counter() == Some(7)));

                let stats = conn.stats();
                assert_eq!(stats.records, 2);
                assert_eq!(stats.malformed, 1);
                assert_eq!(stats.ignored, 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_fires_hook_and_blocks_sends() {
        LocalSet::new()
            .run_until(async {
                let (conn, device) = attached();
                let closed = Rc::new(Cell::new(0));
                let hook = closed.clone();
                conn.on_close(move || hook.set(hook.get() + 1));

                drop(device);
                settle().await;

                assert_eq!(conn.state(), ConnectionState::Closed);
                assert_eq!(closed.get(), 1);
                assert!(matches!(
                    conn.send_command(&Command::get(CommandId::TrackerDisplay)),
                    Err(ConnectionError::NotConnected)
                ));
                conn.close();
                assert_eq!(closed.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent() {
        LocalSet::new()
            .run_until(async {
                let (conn, _device) = attached();
                conn.close();
                conn.close();
                assert_eq!(conn.state(), ConnectionState::Closed);
                assert!(conn.send(b"x\r\n").is_err());
            })
            .await;
    }

    #[tokio::test]
    async fn refused_connect_reports_error_and_closes() {
        LocalSet::new()
            .run_until(async {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                drop(listener);

                let config = ClientConfig {
                    port,
                    ..ClientConfig::default()
                };
                let conn = Connection::new(&config);
                let errors = Rc::new(Cell::new(0));
                let hook = errors.clone();
                conn.on_error(move |_| hook.set(hook.get() + 1));

                assert!(matches!(
                    conn.connect().await,
                    Err(ConnectionError::Socket(_))
                ));
                assert_eq!(conn.state(), ConnectionState::Closed);
                assert_eq!(errors.get(), 1);
                assert!(matches!(conn.connect().await, Err(ConnectionError::Closed)));
            })
            .await;
    }

    #[tokio::test]
    async fn connects_over_tcp() {
        LocalSet::new()
            .run_until(async {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                let config = ClientConfig {
                    port: listener.local_addr().unwrap().port(),
                    ..ClientConfig::default()
                };
                let conn = Connection::new(&config);
                let (accepted, connected) = tokio::join!(listener.accept(), conn.connect());
                connected.unwrap();
                assert!(conn.is_connected());

                let (server, _) = accepted.unwrap();
                conn.send_command(&Command::get(CommandId::EnableSendData))
                    .unwrap();
                let mut lines = BufReader::new(server).lines();
                let line = lines.next_line().await.unwrap().unwrap();
                assert_eq!(line.trim_end(), "<GET ID=\"ENABLE_SEND_DATA\" />");
            })
            .await;
    }

    #[tokio::test]
    async fn close_during_connect_keeps_link_closed() {
        LocalSet::new()
            .run_until(async {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                let config = ClientConfig {
                    port: listener.local_addr().unwrap().port(),
                    ..ClientConfig::default()
                };
                let conn = Connection::new(&config);
                let connecting = conn.clone();
                let pending = tokio::task::spawn_local(async move { connecting.connect().await });

                tokio::task::yield_now().await;
                assert_eq!(conn.state(), ConnectionState::Connecting);
                conn.close();

                assert!(matches!(pending.await.unwrap(), Err(ConnectionError::Closed)));
                assert_eq!(conn.state(), ConnectionState::Closed);
                assert!(matches!(
                    conn.send(b"x\r\n"),
                    Err(ConnectionError::NotConnected)
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn stray_lines_are_counted_not_dispatched() {
        LocalSet::new()
            .run_until(async {
                let (conn, mut device) = attached();
                let seen = Rc::new(Cell::new(0));
                let hook = seen.clone();
                conn.on_record(move |_| hook.set(hook.get() + 1));

                device
                    .write_all(b"\r\n<SET ID=\"CALIBRATE_START\" STATE=\"1\" />\r\n")
                    .await
                    .unwrap();
                settle().await;

                assert_eq!(seen.get(), 0);
                let stats = conn.stats();
                assert_eq!((stats.records, stats.ignored, stats.malformed), (0, 2, 0));
            })
            .await;
    }
}
