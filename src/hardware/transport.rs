//! SCPI transports.
//!
//! Abstracts the byte pipe underneath every instrument (TCP socket, serial port, mock)
//! so that the dialect adapters only ever deal in command strings.
//!
//! Transports serialise their own I/O: one command or query is in flight at a time per
//! connection. No read timeouts are applied; an instrument that never answers a query
//! stalls the caller.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Trait for SCPI communication transports.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query command and return the (trimmed) response line.
    async fn query(&self, command: &str) -> Result<String>;

    /// Human-readable description of the connection, for logs.
    fn describe(&self) -> String;
}

/// Read one reply line. End of stream before any byte is an error, not an empty reply.
async fn read_reply<R>(reader: &mut R, command: &str, source: &str) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut response = String::new();
    let read = reader
        .read_line(&mut response)
        .await
        .with_context(|| format!("read reply to '{command}' from {source}"))?;
    if read == 0 {
        bail!("{source} closed the connection during '{command}'");
    }
    Ok(response.trim().to_string())
}

/// Newline-terminated SCPI over a raw TCP socket (port 5025 on most Keysight gear).
pub struct TcpScpiTransport {
    address: String,
    stream: Mutex<BufReader<TcpStream>>,
}

impl TcpScpiTransport {
    /// Connect to `host:port`.
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("Failed to connect to {address}"))?;
        info!(address, "SCPI TCP connection open");
        Ok(Self {
            address: address.to_string(),
            stream: Mutex::new(BufReader::new(stream)),
        })
    }
}

#[async_trait]
impl ScpiTransport for TcpScpiTransport {
    async fn write(&self, command: &str) -> Result<()> {
        let mut stream = self.stream.lock().await;
        debug!(address = %self.address, command, "SCPI write");
        stream
            .get_mut()
            .write_all(format!("{command}\n").as_bytes())
            .await
            .with_context(|| format!("write '{command}' to {}", self.address))
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut stream = self.stream.lock().await;
        debug!(address = %self.address, command, "SCPI query");
        stream
            .get_mut()
            .write_all(format!("{command}\n").as_bytes())
            .await
            .with_context(|| format!("write '{command}' to {}", self.address))?;

        read_reply(&mut *stream, command, &self.address).await
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// Serial SCPI transport (RS-232 / USB-serial), LF terminated.
#[cfg(feature = "instrument_serial")]
pub struct SerialScpiTransport {
    path: String,
    port: Mutex<BufReader<tokio_serial::SerialStream>>,
}

#[cfg(feature = "instrument_serial")]
impl SerialScpiTransport {
    /// Open a serial port at the given baud rate, 8N1, no flow control.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open serial port {path}"))?;
        info!(path, baud, "SCPI serial connection open");
        Ok(Self {
            path: path.to_string(),
            port: Mutex::new(BufReader::new(port)),
        })
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl ScpiTransport for SerialScpiTransport {
    async fn write(&self, command: &str) -> Result<()> {
        let mut port = self.port.lock().await;
        port.get_mut()
            .write_all(format!("{command}\n").as_bytes())
            .await
            .with_context(|| format!("write '{command}' to {}", self.path))
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut port = self.port.lock().await;
        port.get_mut()
            .write_all(format!("{command}\n").as_bytes())
            .await
            .with_context(|| format!("write '{command}' to {}", self.path))?;
        read_reply(&mut *port, command, &self.path).await
    }

    fn describe(&self) -> String {
        format!("serial://{}", self.path)
    }
}

/// Parsed instrument address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAddress {
    /// `tcp://host:port`
    Tcp(String),
    /// `serial://path[@baud]`
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
        path: String,
        /// Baud rate, 9600 when not given
        baud: u32,
    },
}

impl std::str::FromStr for TransportAddress {
    type Err = anyhow::Error;

    fn from_str(address: &str) -> Result<Self> {
        let address = address.trim();
        if let Some(host) = address.strip_prefix("tcp://") {
            if !host.contains(':') {
                bail!("TCP address '{address}' needs an explicit port");
            }
            return Ok(TransportAddress::Tcp(host.to_string()));
        }
        if let Some(rest) = address.strip_prefix("serial://") {
            let (path, baud) = match rest.rsplit_once('@') {
                Some((path, baud)) => (
                    path,
                    baud.parse::<u32>()
                        .with_context(|| format!("invalid baud rate in '{address}'"))?,
                ),
                None => (rest, 9600),
            };
            if path.is_empty() {
                bail!("Serial address '{address}' has no device path");
            }
            return Ok(TransportAddress::Serial {
                path: path.to_string(),
                baud,
            });
        }
        Err(anyhow!(
            "Unsupported instrument address '{address}' (expected tcp://host:port or serial://path[@baud])"
        ))
    }
}

/// Open a transport for an address string.
pub async fn open_transport(address: &str) -> Result<Arc<dyn ScpiTransport>> {
    match address.parse::<TransportAddress>()? {
        TransportAddress::Tcp(host) => Ok(Arc::new(TcpScpiTransport::connect(&host).await?)),
        #[cfg(feature = "instrument_serial")]
        TransportAddress::Serial { path, baud } => {
            Ok(Arc::new(SerialScpiTransport::open(&path, baud)?))
        }
        #[cfg(not(feature = "instrument_serial"))]
        TransportAddress::Serial { .. } => Err(anyhow!(
            "Serial support not enabled. Rebuild with --features instrument_serial"
        )),
    }
}
