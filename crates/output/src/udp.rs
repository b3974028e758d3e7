// Copyright 2025-2026 CEMAXECUTER LLC

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use byteorder::{LittleEndian, WriteBytesExt};
use num_complex::Complex32;

use crate::{SampleSink, SinkError};

/// Complex samples per datagram: 8 bytes each, 8192-byte payload.
const SAMPLES_PER_DATAGRAM: usize = 1024;

/// UDP sink: encodes sample blocks as little-endian f32 I/Q pairs and
/// sends them in fixed-size datagrams. Unordered, unacknowledged.
pub struct UdpSink {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpSink {
    /// Resolve the destination and connect an ephemeral local socket.
    pub fn new(address: &str, port: u16) -> Result<Self, SinkError> {
        let dest = (address, port)
            .to_socket_addrs()
            .map_err(|e| SinkError::Addr(format!("{}:{}: {}", address, port, e)))?
            .next()
            .ok_or_else(|| {
                SinkError::Addr(format!("{}:{}: no address found", address, port))
            })?;

        let bind_addr = if dest.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).map_err(SinkError::Bind)?;
        socket.connect(dest).map_err(SinkError::Bind)?;

        log::info!("UDP sink: sending to {}", dest);
        Ok(Self { socket, dest })
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }
}

impl SampleSink for UdpSink {
    fn write(&mut self, samples: &[Complex32]) -> Result<(), SinkError> {
        for chunk in samples.chunks(SAMPLES_PER_DATAGRAM) {
            let mut payload = Vec::with_capacity(chunk.len() * 8);
            for s in chunk {
                payload.write_f32::<LittleEndian>(s.re).map_err(SinkError::Send)?;
                payload.write_f32::<LittleEndian>(s.im).map_err(SinkError::Send)?;
            }
            self.socket.send(&payload).map_err(SinkError::Send)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_datagram_payload() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut sink = UdpSink::new("127.0.0.1", port).unwrap();
        let samples = vec![
            Complex32::new(0.5, -0.25),
            Complex32::new(1.0, 2.0),
            Complex32::new(-3.5, 0.125),
        ];
        sink.write(&samples).unwrap();

        let mut buf = [0u8; 65536];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(n, samples.len() * 8);

        for (i, s) in samples.iter().enumerate() {
            let base = i * 8;
            let re = f32::from_le_bytes(buf[base..base + 4].try_into().unwrap());
            let im = f32::from_le_bytes(buf[base + 4..base + 8].try_into().unwrap());
            assert_eq!(re, s.re);
            assert_eq!(im, s.im);
        }
    }

    #[test]
    fn test_large_block_split_into_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut sink = UdpSink::new("127.0.0.1", port).unwrap();
        let samples = vec![Complex32::new(1.0, 1.0); SAMPLES_PER_DATAGRAM + 10];
        sink.write(&samples).unwrap();

        let mut buf = [0u8; 65536];
        let first = receiver.recv(&mut buf).unwrap();
        assert_eq!(first, SAMPLES_PER_DATAGRAM * 8);
        let second = receiver.recv(&mut buf).unwrap();
        assert_eq!(second, 10 * 8);
    }

    #[test]
    fn test_unresolvable_address_is_fatal() {
        assert!(matches!(
            UdpSink::new("invalid.host.name.example.invalid", 9090),
            Err(SinkError::Addr(_))
        ));
    }
}
