//! NCP transport: BGAPI frames over a serial port or a TCP socket.
//!
//! Commands are written and then block until the controller answers them.
//! Events that arrive while waiting are queued and handed out later, in
//! arrival order, by [`Transport::next_event`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use advmon::ble::bgapi::{encode_command, response_id, FrameDecoder, Packet};
use advmon::config::COMMAND_RESPONSE_TIMEOUT_MS;
use advmon::{Command, Controller, Event, Transport};
use anyhow::{bail, Context, Result};
use serialport::SerialPort;
use tracing::{debug, info, trace, warn};

use crate::cli::Cli;

/// Granularity of blocking reads.
const READ_POLL: Duration = Duration::from_millis(10);

const RX_CHUNK: usize = 256;

/// Byte link to the controller.
pub enum Link {
    Serial(Box<dyn SerialPort>),
    Tcp(TcpStream),
}

impl Read for Link {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Link::Serial(port) => port.read(buf),
            Link::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for Link {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Link::Serial(port) => port.write(buf),
            Link::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Link::Serial(port) => port.flush(),
            Link::Tcp(stream) => stream.flush(),
        }
    }
}

/// Open the link selected on the command line.
pub fn open(cli: &Cli) -> Result<NcpTransport<Link>> {
    if let Some(path) = &cli.uart {
        let port = serialport::new(path, cli.baudrate)
            .timeout(READ_POLL)
            .open()
            .with_context(|| format!("failed to open serial port {path} @ {}", cli.baudrate))?;
        info!("connected to {path} @ {} baud", cli.baudrate);
        return Ok(NcpTransport::new(Link::Serial(port), path.clone()));
    }
    if let Some(host) = &cli.tcp {
        let stream = TcpStream::connect((host.as_str(), cli.tcp_port))
            .with_context(|| format!("failed to connect to {host}:{}", cli.tcp_port))?;
        stream.set_read_timeout(Some(READ_POLL))?;
        stream.set_nodelay(true)?;
        info!("connected to {host}:{}", cli.tcp_port);
        return Ok(NcpTransport::new(
            Link::Tcp(stream),
            format!("{host}:{}", cli.tcp_port),
        ));
    }
    bail!("no transport selected (use --uart or --tcp)")
}

pub struct NcpTransport<L> {
    link: L,
    label: String,
    decoder: FrameDecoder,
    pending: VecDeque<Event>,
    response_timeout: Duration,
}

impl<L: Read + Write> NcpTransport<L> {
    pub fn new(link: L, label: String) -> Self {
        Self {
            link,
            label,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            response_timeout: Duration::from_millis(COMMAND_RESPONSE_TIMEOUT_MS),
        }
    }

    #[cfg(test)]
    fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Next decoded packet, reading from the link until `until`.
    fn next_packet(&mut self, until: Instant) -> Result<Option<Packet>> {
        let mut chunk = [0u8; RX_CHUNK];
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                let packet = Packet::parse(&frame)
                    .with_context(|| format!("malformed frame from {}", self.label))?;
                return Ok(Some(packet));
            }
            if Instant::now() >= until {
                return Ok(None);
            }
            match self.link.read(&mut chunk) {
                Ok(0) => bail!("{} closed the connection", self.label),
                Ok(n) => {
                    trace!("rx {} bytes", n);
                    self.decoder.push(&chunk[..n]);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("reading from {}", self.label));
                }
            }
        }
    }
}

impl<L: Read + Write> Controller for NcpTransport<L> {
    type Error = anyhow::Error;

    fn send(&mut self, command: Command) -> Result<()> {
        let frame = encode_command(&command).with_context(|| format!("encoding {command:?}"))?;
        debug!("tx {:?}", command);
        self.link
            .write_all(&frame)
            .and_then(|()| self.link.flush())
            .with_context(|| format!("writing to {}", self.label))?;

        let Some(expected) = response_id(&command) else {
            return Ok(());
        };
        let until = Instant::now() + self.response_timeout;
        loop {
            match self.next_packet(until)? {
                Some(Packet::Response {
                    class,
                    method,
                    result,
                }) if (class, method) == expected => {
                    if result != 0 {
                        bail!("{command:?} failed with result 0x{result:04x}");
                    }
                    return Ok(());
                }
                Some(Packet::Response { class, method, .. }) => {
                    warn!("stray response class 0x{:02x} method 0x{:02x}", class, method);
                }
                Some(Packet::Event(event)) => self.pending.push_back(event),
                None => bail!(
                    "no response to {command:?} within {} ms",
                    self.response_timeout.as_millis()
                ),
            }
        }
    }
}

impl<L: Read + Write> Transport for NcpTransport<L> {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<Event>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        let until = Instant::now() + timeout;
        loop {
            match self.next_packet(until)? {
                Some(Packet::Event(event)) => return Ok(Some(event)),
                Some(Packet::Response { class, method, .. }) => {
                    warn!("stray response class 0x{:02x} method 0x{:02x}", class, method);
                }
                None => return Ok(None),
            }
        }
    }
}

impl<L> Drop for NcpTransport<L> {
    fn drop(&mut self) {
        debug!("closing {}", self.label);
    }
}
