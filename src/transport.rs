// src/transport.rs
use crate::config::ClientConfig;
use crate::error::{HddError, Result};
use log::{debug, info, trace};
use std::io::{self, Error, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// Source of the single stream connection to the block store.
pub trait Connector {
    type Stream: Read + Write;

    fn connect(&self) -> io::Result<Self::Stream>;

    /// Human-readable endpoint for log lines.
    fn describe(&self) -> String;
}

pub struct TcpConnector {
    config: ClientConfig,
}

impl TcpConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> io::Result<TcpStream> {
        let addrs = (self.config.host.as_str(), self.config.port).to_socket_addrs()?;

        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.config.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(self.config.io_timeout)?;
                    stream.set_write_timeout(self.config.io_timeout)?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::new(
                ErrorKind::AddrNotAvailable,
                format!("{} resolved to no addresses", self.config.endpoint()),
            )
        }))
    }

    fn describe(&self) -> String {
        self.config.endpoint()
    }
}

/// Writes all of `buf`, continuing after short writes.
pub fn write_fully<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        match writer.write(&buf[sent..]) {
            Ok(0) => {
                return Err(Error::new(
                    ErrorKind::WriteZero,
                    format!("connection accepted {} of {} bytes", sent, buf.len()),
                ))
            }
            Ok(n) => {
                sent += n;
                if sent < buf.len() {
                    trace!("Short write: {}/{} bytes", sent, buf.len());
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    writer.flush()
}

/// Reads exactly `count` bytes. A zero-length read is end of stream.
pub fn read_fully<R: Read + ?Sized>(reader: &mut R, count: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; count];
    let mut received = 0;
    while received < count {
        match reader.read(&mut buf[received..]) {
            Ok(0) => {
                return Err(Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("connection closed after {} of {} bytes", received, count),
                ))
            }
            Ok(n) => {
                received += n;
                if received < count {
                    trace!("Short read: {}/{} bytes", received, count);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

/// Owns the connection. Any failed send or receive drops it, since the
/// stream can no longer be trusted to be on a header boundary.
pub struct Transport<C: Connector> {
    connector: C,
    stream: Option<C::Stream>,
}

impl<C: Connector> Transport<C> {
    pub fn new(connector: C) -> Self {
        Self { connector, stream: None }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.connector.connect()?;
        info!("Connected to block store at {}", self.connector.describe());
        self.stream = Some(stream);
        Ok(())
    }

    pub fn send_all(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(HddError::NotConnected)?;
        if let Err(e) = write_fully(stream, buf) {
            self.drop_stream(&e);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn recv_all(&mut self, count: usize) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(HddError::NotConnected)?;
        match read_fully(stream, count) {
            Ok(buf) => Ok(buf),
            Err(e) => {
                self.drop_stream(&e);
                Err(e.into())
            }
        }
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Closed connection to {}", self.connector.describe());
        }
    }

    fn drop_stream(&mut self, cause: &io::Error) {
        debug!("Dropping connection to {}: {}", self.connector.describe(), cause);
        self.stream = None;
    }
}
