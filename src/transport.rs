//! # Modbus Transport Layer
//!
//! Byte-level I/O underneath the wire codecs. A transport only moves bytes;
//! framing, CRC and MBAP handling live in the codecs.
//!
//! Every call is non-blocking: `recv` and `send` return `Ok(0)` when the device
//! has nothing to offer or cannot accept more right now. An `Err` means the link
//! is broken and the owner should `kill` and `init` it again.
//!
//! ## Supported Transports
//!
//! ### TCP (`TcpTransport`)
//! - Wraps a tokio `TcpStream` and drives it through `try_read`/`try_write`
//! - Built from an accepted stream (slave) or connected to a peer (master)
//! - `init` never connects; a killed client link is reopened with the async
//!   `reconnect` from the host runtime
//!
//! ### Serial (`SerialTransport`)
//! - RS-232/RS-485 port opened through `tokio-serial` in polling mode
//! - Configurable data bits, stop bits and parity
//!
//! ### Memory (`MemoryTransport`)
//! - In-process pipe pair for tests and simulation
//! - Fault injection: failed calls, throttled sends, injected line noise
//!
//! ## Usage
//!
//! ```rust
//! use modbus_engine::transport::{MemoryTransport, ModbusTransport};
//!
//! let (mut master, mut slave) = MemoryTransport::pair();
//! master.send(&[0x01, 0x03]).unwrap();
//!
//! let mut buf = [0u8; 8];
//! assert_eq!(slave.recv(&mut buf).unwrap(), 2);
//! assert_eq!(slave.recv(&mut buf).unwrap(), 0);
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::net::TcpStream;
use tracing::info;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;
use crate::utils::format::bytes_to_hex;

/// Log packet with direction and format
pub(crate) fn log_packet(direction: &str, data: &[u8], protocol: &str, slave_id: Option<SlaveId>) {
    let hex_string = bytes_to_hex(data);
    match slave_id {
        Some(id) => info!("[MODBUS-{}] {} slave:{} {}", protocol, direction, id, hex_string),
        None => info!("[MODBUS-{}] {} {}", protocol, direction, hex_string),
    }
}

/// Physical link driven by a codec
///
/// Implementations must never block. The codec calls `recv`/`send` from inside
/// the engine tick and expects them to return immediately.
pub trait ModbusTransport: Send {
    /// Open or reopen the link
    fn init(&mut self) -> ModbusResult<()>;

    /// Close the link, dropping any OS handle
    fn kill(&mut self);

    /// Read whatever is available into `buf`
    ///
    /// Returns `Ok(0)` when nothing is pending.
    fn recv(&mut self, buf: &mut [u8]) -> ModbusResult<usize>;

    /// Write as much of `buf` as the link accepts right now
    fn send(&mut self, buf: &[u8]) -> ModbusResult<usize>;

    /// Check if the link is currently open
    fn is_connected(&self) -> bool;

    /// Byte and error counters
    fn get_stats(&self) -> TransportStats;
}

impl<T: ModbusTransport + ?Sized> ModbusTransport for Box<T> {
    fn init(&mut self) -> ModbusResult<()> {
        (**self).init()
    }

    fn kill(&mut self) {
        (**self).kill()
    }

    fn recv(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        (**self).recv(buf)
    }

    fn send(&mut self, buf: &[u8]) -> ModbusResult<usize> {
        (**self).send(buf)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn get_stats(&self) -> TransportStats {
        (**self).get_stats()
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub reconnects: u64,
}

/// TCP transport over a non-blocking tokio stream
pub struct TcpTransport {
    stream: Option<TcpStream>,
    pub address: SocketAddr,
    /// Reconnect target; `None` for a server-side accepted stream
    remote: Option<SocketAddr>,
    connect_timeout: Duration,
    stats: TransportStats,
}

impl TcpTransport {
    /// Wrap a stream accepted by a listener
    ///
    /// Such a transport cannot reconnect: once killed, `init` fails.
    pub fn from_stream(stream: TcpStream) -> ModbusResult<Self> {
        let address = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: Some(stream),
            address,
            remote: None,
            connect_timeout: Duration::from_secs(5),
            stats: TransportStats::default(),
        })
    }

    /// Connect to a slave
    pub async fn connect(address: SocketAddr, connect_timeout: Duration) -> ModbusResult<Self> {
        let stream = Self::open(address, connect_timeout).await?;
        Ok(Self {
            stream: Some(stream),
            address,
            remote: Some(address),
            connect_timeout,
            stats: TransportStats::default(),
        })
    }

    /// Re-establish a client connection after the link was killed
    ///
    /// `init` never blocks, so reconnecting is left to the host's runtime.
    pub async fn reconnect(&mut self) -> ModbusResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let remote = self.remote.ok_or_else(|| {
            ModbusError::connection(format!("Peer {} disconnected", self.address))
        })?;
        self.stream = Some(Self::open(remote, self.connect_timeout).await?);
        self.stats.reconnects += 1;
        Ok(())
    }

    async fn open(address: SocketAddr, connect_timeout: Duration) -> ModbusResult<TcpStream> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ModbusError::connection(format!("Timed out connecting to {}", address)))?
            .map_err(|e| {
                ModbusError::connection(format!("Failed to connect to {}: {}", address, e))
            })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn stream(&self) -> ModbusResult<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| ModbusError::connection(format!("Not connected to {}", self.address)))
    }
}

impl ModbusTransport for TcpTransport {
    /// Succeeds only while the stream is open; see [`TcpTransport::reconnect`]
    fn init(&mut self) -> ModbusResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        Err(ModbusError::connection(format!(
            "Not connected to {}; reconnect from the host runtime",
            self.address
        )))
    }

    fn kill(&mut self) {
        self.stream = None;
    }

    fn recv(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let result = self.stream()?.try_read(buf);
        match result {
            Ok(0) => {
                self.stats.errors += 1;
                Err(ModbusError::connection(format!("Peer {} closed the connection", self.address)))
            }
            Ok(n) => {
                self.stats.bytes_received += n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.stats.errors += 1;
                Err(e.into())
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> ModbusResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let result = self.stream()?.try_write(buf);
        match result {
            Ok(n) => {
                self.stats.bytes_sent += n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.stats.errors += 1;
                Err(e.into())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Serial transport opened in polling mode
pub struct SerialTransport {
    /// Serial port connection
    port: Option<Box<dyn tokio_serial::SerialPort>>,
    /// Port name/path
    port_name: String,
    /// Baud rate
    baud_rate: u32,
    /// Data bits (7 or 8)
    data_bits: tokio_serial::DataBits,
    /// Stop bits
    stop_bits: tokio_serial::StopBits,
    /// Parity
    parity: tokio_serial::Parity,
    stats: TransportStats,
}

impl SerialTransport {
    /// Create a serial transport with 8N1 framing
    ///
    /// The port is not opened until `init` is called.
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self::new_with_config(
            port,
            baud_rate,
            tokio_serial::DataBits::Eight,
            tokio_serial::StopBits::One,
            tokio_serial::Parity::None,
        )
    }

    /// Create a serial transport with full configuration
    pub fn new_with_config(
        port: &str,
        baud_rate: u32,
        data_bits: tokio_serial::DataBits,
        stop_bits: tokio_serial::StopBits,
        parity: tokio_serial::Parity,
    ) -> Self {
        Self {
            port: None,
            port_name: port.to_string(),
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            stats: TransportStats::default(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port(&mut self) -> ModbusResult<&mut Box<dyn tokio_serial::SerialPort>> {
        let name = &self.port_name;
        self.port
            .as_mut()
            .ok_or_else(|| ModbusError::connection(format!("Serial port {} is not open", name)))
    }
}

impl ModbusTransport for SerialTransport {
    fn init(&mut self) -> ModbusResult<()> {
        // zero timeout: reads return immediately with whatever is buffered
        let port = tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .timeout(Duration::ZERO)
            .open()
            .map_err(|e| {
                ModbusError::connection(format!(
                    "Failed to open serial port {}: {}",
                    self.port_name, e
                ))
            })?;

        if self.port.replace(port).is_some() {
            self.stats.reconnects += 1;
        }
        Ok(())
    }

    fn kill(&mut self) {
        self.port = None;
    }

    fn recv(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let result = self.port()?.read(buf);
        match result {
            Ok(n) => {
                self.stats.bytes_received += n as u64;
                Ok(n)
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => {
                self.stats.errors += 1;
                Err(e.into())
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> ModbusResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let result = self.port()?.write(buf);
        match result {
            Ok(n) => {
                self.stats.bytes_sent += n as u64;
                Ok(n)
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => {
                self.stats.errors += 1;
                Err(e.into())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[derive(Debug)]
struct LinkState {
    connected: bool,
    fail_recv: usize,
    fail_send: usize,
    /// Maximum bytes accepted per `send` call; `Some(0)` stalls the link
    send_limit: Option<usize>,
    /// Maximum bytes returned per `recv` call
    recv_limit: Option<usize>,
    inits: usize,
    kills: usize,
    stats: TransportStats,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            connected: true,
            fail_recv: 0,
            fail_send: 0,
            send_limit: None,
            recv_limit: None,
            inits: 0,
            kills: 0,
            stats: TransportStats::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory transport
///
/// Clones share the same queues and fault knobs, so a test can keep a handle
/// after moving the transport into a codec.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    rx: Arc<Mutex<BytesMut>>,
    tx: Arc<Mutex<BytesMut>>,
    state: Arc<Mutex<LinkState>>,
}

impl MemoryTransport {
    /// Standalone transport; feed it with `inject`, inspect it with `take_sent`
    pub fn new() -> Self {
        Self::default()
    }

    /// Two transports wired back to back
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Mutex::new(BytesMut::new()));
        let b_to_a = Arc::new(Mutex::new(BytesMut::new()));
        let a = Self {
            rx: b_to_a.clone(),
            tx: a_to_b.clone(),
            state: Arc::default(),
        };
        let b = Self {
            rx: a_to_b,
            tx: b_to_a,
            state: Arc::default(),
        };
        (a, b)
    }

    /// Queue bytes as if they had arrived on the wire
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.rx).extend_from_slice(bytes);
    }

    /// Remove and return everything sent so far
    pub fn take_sent(&self) -> Vec<u8> {
        lock(&self.tx).split().to_vec()
    }

    /// Bytes waiting to be received
    pub fn pending(&self) -> usize {
        lock(&self.rx).len()
    }

    /// Make the next `count` calls to `recv` fail
    pub fn fail_next_recv(&self, count: usize) {
        lock(&self.state).fail_recv = count;
    }

    /// Make the next `count` calls to `send` fail
    pub fn fail_next_send(&self, count: usize) {
        lock(&self.state).fail_send = count;
    }

    pub fn set_send_limit(&self, limit: Option<usize>) {
        lock(&self.state).send_limit = limit;
    }

    pub fn set_recv_limit(&self, limit: Option<usize>) {
        lock(&self.state).recv_limit = limit;
    }

    /// Number of `init` calls seen
    pub fn inits(&self) -> usize {
        lock(&self.state).inits
    }

    /// Number of `kill` calls seen
    pub fn kills(&self) -> usize {
        lock(&self.state).kills
    }
}

impl ModbusTransport for MemoryTransport {
    fn init(&mut self) -> ModbusResult<()> {
        let mut state = lock(&self.state);
        state.inits += 1;
        state.connected = true;
        Ok(())
    }

    fn kill(&mut self) {
        let mut state = lock(&self.state);
        state.kills += 1;
        state.connected = false;
    }

    fn recv(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        let mut state = lock(&self.state);
        if state.fail_recv > 0 {
            state.fail_recv -= 1;
            state.stats.errors += 1;
            return Err(ModbusError::io("injected receive failure"));
        }
        if !state.connected {
            return Err(ModbusError::connection("memory link is down"));
        }

        let mut rx = lock(&self.rx);
        let n = buf.len().min(rx.len()).min(state.recv_limit.unwrap_or(usize::MAX));
        buf[..n].copy_from_slice(&rx[..n]);
        rx.advance(n);
        state.stats.bytes_received += n as u64;
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> ModbusResult<usize> {
        let mut state = lock(&self.state);
        if state.fail_send > 0 {
            state.fail_send -= 1;
            state.stats.errors += 1;
            return Err(ModbusError::io("injected send failure"));
        }
        if !state.connected {
            return Err(ModbusError::connection("memory link is down"));
        }

        let n = buf.len().min(state.send_limit.unwrap_or(usize::MAX));
        lock(&self.tx).extend_from_slice(&buf[..n]);
        state.stats.bytes_sent += n as u64;
        Ok(n)
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn get_stats(&self) -> TransportStats {
        lock(&self.state).stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair_is_crossed() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.send(&[1, 2, 3]).unwrap();
        b.send(&[9]).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(b.recv(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(a.recv(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 9);
        assert_eq!(a.get_stats().bytes_sent, 3);
    }

    #[test]
    fn test_memory_fault_injection() {
        let mut transport = MemoryTransport::new();
        let wire = transport.clone();

        wire.fail_next_recv(1);
        let mut buf = [0u8; 4];
        assert!(transport.recv(&mut buf).unwrap_err().is_transport_error());
        assert_eq!(transport.recv(&mut buf).unwrap(), 0);

        wire.set_send_limit(Some(2));
        assert_eq!(transport.send(&[1, 2, 3]).unwrap(), 2);
        assert_eq!(wire.take_sent(), vec![1, 2]);

        transport.kill();
        assert!(!wire.is_connected());
        assert!(transport.send(&[1]).is_err());
        transport.init().unwrap();
        assert_eq!((wire.inits(), wire.kills()), (1, 1));
    }

    #[test]
    fn test_memory_recv_limit() {
        let mut transport = MemoryTransport::new();
        transport.inject(&[1, 2, 3, 4, 5]);
        transport.set_recv_limit(Some(2));
        let mut buf = [0u8; 8];
        assert_eq!(transport.recv(&mut buf).unwrap(), 2);
        assert_eq!(transport.pending(), 3);
    }

    #[test]
    fn test_serial_transport_starts_closed() {
        let mut transport = SerialTransport::new("/dev/does-not-exist", 9600);
        assert!(!transport.is_connected());
        let mut buf = [0u8; 4];
        assert!(transport.recv(&mut buf).is_err());
        assert!(transport.init().is_err());
    }

    #[tokio::test]
    async fn test_tcp_transport_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let mut client = TcpTransport::connect(address, Duration::from_secs(1)).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let mut server = TcpTransport::from_stream(stream).unwrap();

        assert_eq!(client.send(&[0xAA, 0xBB]).unwrap(), 2);

        let mut buf = [0u8; 8];
        let mut received = 0;
        for _ in 0..100 {
            server.stream().unwrap().readable().await.unwrap();
            received += server.recv(&mut buf[received..]).unwrap();
            if received == 2 {
                break;
            }
        }
        assert_eq!(&buf[..2], &[0xAA, 0xBB]);

        server.kill();
        assert!(server.init().is_err());
        assert!(server.reconnect().await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_init_does_not_reconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let mut client = TcpTransport::connect(address, Duration::from_secs(1)).await.unwrap();
        let _first = listener.accept().await.unwrap();
        assert!(client.init().is_ok());

        client.kill();
        let err = client.init().unwrap_err();
        assert!(err.is_transport_error());
        assert!(!client.is_connected());

        client.reconnect().await.unwrap();
        let _second = listener.accept().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.get_stats().reconnects, 1);
    }
}
