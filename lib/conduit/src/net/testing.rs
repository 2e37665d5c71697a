//! In-memory stream used to exercise the framing and session layers
//! without a socket.

use ferrite::crypto;
use ferrite::crypto::RsaPrivateKey;
use lazy_static::lazy_static;
use std::io;
use std::io::{Cursor, Read, Write};

lazy_static! {
    /// Shared test keys; RSA generation is too slow to repeat per test.
    pub static ref TEST_CA_KEY: RsaPrivateKey = crypto::generate_keypair(1024).unwrap();
    pub static ref TEST_PEER_KEY: RsaPrivateKey = crypto::generate_keypair(1024).unwrap();
    pub static ref TEST_OTHER_KEY: RsaPrivateKey = crypto::generate_keypair(1024).unwrap();
}

/// A connected loopback stream pair: (connector side, listener side).
pub fn tcp_pair() -> (std::net::TcpStream, std::net::TcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = std::net::TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();

    (client, server)
}

pub struct MockStream {
    pub incoming: Cursor<Vec<u8>>,
    pub outgoing: Vec<u8>,
}

impl MockStream {
    pub fn new() -> MockStream {
        MockStream::with_incoming(Vec::new())
    }

    pub fn with_incoming(data: Vec<u8>) -> MockStream {
        MockStream {
            incoming: Cursor::new(data),
            outgoing: Vec::new(),
        }
    }

    /// Everything written so far becomes the readable side of a fresh
    /// stream, turning one mock into its own peer.
    pub fn loopback(self) -> MockStream {
        MockStream::with_incoming(self.outgoing)
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.incoming.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
