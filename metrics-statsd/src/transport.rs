use std::{
    fmt,
    io,
    net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs as _, UdpSocket},
    time::Duration,
};

#[cfg(unix)]
use std::{
    os::unix::net::{UnixDatagram, UnixStream},
    path::PathBuf,
};

/// A writable connection to a StatsD daemon.
///
/// A transport is owned exclusively by a client's packet buffer, which serializes every call to it. Each call to
/// [`send`][Transport::send] carries one complete packet: one datagram for connectionless transports, or one write for
/// stream transports. Failures are reported back but never retried.
pub trait Transport: Send {
    /// Sends a single packet.
    ///
    /// # Errors
    ///
    /// If the packet could not be written, an error is returned and the packet is considered lost.
    fn send(&mut self, packet: &[u8]) -> io::Result<()>;

    /// Closes the transport.
    ///
    /// Called exactly once, after the final flush.
    ///
    /// # Errors
    ///
    /// If the underlying connection could not be shut down cleanly, an error is returned.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Returns a short identifier for the transport, used in diagnostics.
    fn transport_id(&self) -> &'static str {
        "custom"
    }
}

/// Network used to reach the StatsD daemon.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Network {
    /// UDP. Connecting never fails due to the remote side, since there is no handshake.
    #[default]
    Udp,

    /// TCP. Packets are written as newline-terminated chunks on a single stream.
    Tcp,

    /// Unix domain socket in `SOCK_STREAM` mode.
    #[cfg(unix)]
    Unix,

    /// Unix domain socket in `SOCK_DGRAM` mode.
    #[cfg(unix)]
    Unixgram,
}

impl Network {
    /// Returns `true` if the network is stream-oriented.
    ///
    /// Packets written to a stream have no natural boundary, so each one is terminated with a newline.
    pub const fn is_stream(self) -> bool {
        match self {
            Network::Udp => false,
            Network::Tcp => true,
            #[cfg(unix)]
            Network::Unix => true,
            #[cfg(unix)]
            Network::Unixgram => false,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self {
            Network::Udp => "udp",
            Network::Tcp => "tcp",
            #[cfg(unix)]
            Network::Unix => "unix",
            #[cfg(unix)]
            Network::Unixgram => "unixgram",
        };
        f.write_str(id)
    }
}

/// A parsed, but not yet resolved, remote address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RemoteAddr {
    network: Network,
    address: String,
}

impl RemoteAddr {
    /// Parses a remote address for the given network.
    ///
    /// The address may carry a scheme (`udp://`, `tcp://`, `unix://` or `unixgram://`), in which case it overrides
    /// `network`. Socket addresses with no host, such as `:8125`, are sent to `127.0.0.1`.
    pub fn parse(network: Network, addr: &str) -> Result<Self, String> {
        let (network, address) = match addr.split_once("://") {
            Some((scheme, rest)) => {
                let network = match scheme {
                    "udp" => Network::Udp,
                    "tcp" => Network::Tcp,
                    #[cfg(unix)]
                    "unix" => Network::Unix,
                    #[cfg(unix)]
                    "unixgram" => Network::Unixgram,
                    _ => return Err(format!("invalid scheme '{scheme}'")),
                };
                (network, rest)
            }
            None => (network, addr),
        };

        if address.is_empty() {
            return Err("address must not be empty".to_string());
        }

        let address = match network {
            Network::Udp | Network::Tcp if address.starts_with(':') => format!("127.0.0.1{address}"),
            _ => address.to_string(),
        };

        Ok(RemoteAddr { network, address })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs = self.address.to_socket_addrs()?.collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "address resolved to no socket addresses"));
        }
        Ok(addrs)
    }

    /// Opens a connection to the remote address.
    pub fn connect(&self, write_timeout: Option<Duration>) -> io::Result<SocketTransport> {
        match self.network {
            Network::Udp => {
                let addrs = self.resolve()?;
                let socket = if addrs[0].is_ipv4() {
                    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
                } else {
                    UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?
                };
                socket.connect(&addrs[..])?;
                socket.set_write_timeout(write_timeout)?;
                Ok(SocketTransport::Udp(socket))
            }

            Network::Tcp => {
                let addrs = self.resolve()?;
                let stream = TcpStream::connect(&addrs[..])?;
                stream.set_write_timeout(write_timeout)?;
                Ok(SocketTransport::Tcp(stream))
            }

            #[cfg(unix)]
            Network::Unix => {
                let stream = UnixStream::connect(PathBuf::from(&self.address))?;
                stream.set_write_timeout(write_timeout)?;
                Ok(SocketTransport::Unix(stream))
            }

            #[cfg(unix)]
            Network::Unixgram => {
                let socket = UnixDatagram::unbound()?;
                socket.connect(PathBuf::from(&self.address))?;
                socket.set_write_timeout(write_timeout)?;
                Ok(SocketTransport::Unixgram(socket))
            }
        }
    }
}

/// Transport over an operating system socket.
pub(crate) enum SocketTransport {
    Udp(UdpSocket),
    Tcp(TcpStream),

    #[cfg(unix)]
    Unix(UnixStream),

    #[cfg(unix)]
    Unixgram(UnixDatagram),
}

impl Transport for SocketTransport {
    fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        match self {
            SocketTransport::Udp(socket) => socket.send(packet).map(|_| ()),
            SocketTransport::Tcp(stream) => write_stream_packet(stream, packet),

            #[cfg(unix)]
            SocketTransport::Unix(stream) => write_stream_packet(stream, packet),

            #[cfg(unix)]
            SocketTransport::Unixgram(socket) => socket.send(packet).map(|_| ()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self {
            SocketTransport::Udp(_) => Ok(()),
            SocketTransport::Tcp(stream) => stream.shutdown(Shutdown::Both),

            #[cfg(unix)]
            SocketTransport::Unix(stream) => stream.shutdown(Shutdown::Both),

            #[cfg(unix)]
            SocketTransport::Unixgram(_) => Ok(()),
        }
    }

    fn transport_id(&self) -> &'static str {
        match self {
            SocketTransport::Udp(_) => "udp",
            SocketTransport::Tcp(_) => "tcp",
            #[cfg(unix)]
            SocketTransport::Unix(_) => "uds-stream",
            #[cfg(unix)]
            SocketTransport::Unixgram(_) => "uds",
        }
    }
}

// Streams have no packet boundaries, so every packet is terminated with a newline to keep the last line of one packet
// from running into the first line of the next.
fn write_stream_packet<W: io::Write>(stream: &mut W, packet: &[u8]) -> io::Result<()> {
    let mut framed = Vec::with_capacity(packet.len() + 1);
    framed.extend_from_slice(packet);
    framed.push(b'\n');
    stream.write_all(&framed)
}
