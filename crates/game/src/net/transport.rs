use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use super::protocol::{DEFAULT_PORT, MAX_PACKET_SIZE};

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_errors: u64,
}

/// Non-blocking UDP socket. A read with nothing queued is `Ok(None)`, never
/// an error and never a stall.
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    local_addr: Option<SocketAddr>,
    stats: NetworkStats,
    recv_buffer: Box<[u8]>,
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::closed()
    }
}

impl UdpTransport {
    pub fn closed() -> Self {
        Self {
            socket: None,
            local_addr: None,
            stats: NetworkStats::default(),
            recv_buffer: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice(),
        }
    }

    /// Binds an ephemeral port of the same address family as `peer`, so
    /// datagrams to an IPv6 server do not go out of an IPv4 socket.
    pub fn open_for(peer: SocketAddr) -> io::Result<Self> {
        let ip = match peer {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self::bind(SocketAddr::new(ip, 0))
    }

    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Some(socket),
            local_addr: Some(local_addr),
            ..Self::closed()
        })
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            log::debug!("Closed socket {:?}", self.local_addr);
        }
        self.local_addr = None;
    }

    pub fn write(&mut self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is closed"))?;

        match socket.send_to(data, to) {
            Ok(bytes) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += bytes as u64;
                Ok(bytes)
            }
            Err(e) => {
                self.stats.send_errors += 1;
                Err(e)
            }
        }
    }

    /// Returns the next queued datagram, or `None` when nothing is waiting.
    pub fn read(&mut self) -> io::Result<Option<(&[u8], SocketAddr)>> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(None);
        };

        match socket.recv_from(&mut self.recv_buffer) {
            Ok((size, addr)) => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += size as u64;
                Ok(Some((&self.recv_buffer[..size], addr)))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // ICMP port unreachable surfaces here on some platforms
            Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Drains everything queued right now.
    pub fn read_all(&mut self) -> io::Result<Vec<(Vec<u8>, SocketAddr)>> {
        let mut packets = Vec::new();
        while let Some((data, addr)) = self.read()? {
            packets.push((data.to_vec(), addr));
        }
        Ok(packets)
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Resolves `host`, `host:port` or an IP literal, preferring IPv4.
/// Without a port, [`DEFAULT_PORT`] is used.
pub fn resolve_address(address: &str) -> io::Result<SocketAddr> {
    let address = address.trim();
    if address.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty address"));
    }

    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    let with_port = address
        .rsplit_once(':')
        .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)));

    let candidates: Vec<SocketAddr> = match with_port {
        Some((host, port)) => (host, port).to_socket_addrs()?.collect(),
        None => (address, DEFAULT_PORT).to_socket_addrs()?.collect(),
    };

    candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for \"{}\"", address),
            )
        })
}
