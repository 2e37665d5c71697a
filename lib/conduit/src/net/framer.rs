use crate::net::poller::Poller;
use crate::net::support::{Error, NetResult};
use std::collections::VecDeque;
use std::io;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::AsRawFd;

/// Length-prefixed byte framing over a stream. The framer exclusively
/// owns the underlying socket and performs no interpretation of content;
/// every read is blocking recv-exact and every write is all-or-nothing.
///
/// Generic over the stream so the protocol layers can be exercised
/// against in-memory transports; production code uses `TcpStream`.
pub struct Framer<S: Read + Write> {
    stream: S,
    poller: Option<Poller>,
    outgoing: VecDeque<Vec<u8>>,
}

impl<S: Read + Write> Framer<S> {
    #[inline]
    pub fn new(stream: S) -> Framer<S> {
        Framer {
            stream,
            poller: None,
            outgoing: VecDeque::new(),
        }
    }

    /// Reads exactly `count` bytes. A peer close before the buffer is
    /// satisfied surfaces as `ConnectionLost`.
    pub fn read_exact(&mut self, count: usize) -> NetResult<Vec<u8>> {
        let mut data = vec![0u8; count];
        let mut filled = 0;

        while filled < count {
            match self.stream.read(&mut data[filled..]) {
                Ok(0) => return Err(Error::ConnectionLost),
                Ok(read) => filled += read,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(data)
    }

    /// Reads a one-byte header length followed by the header itself.
    pub fn read_header(&mut self) -> NetResult<Vec<u8>> {
        let header_length = self.read_exact(1)?[0] as usize;

        if header_length == 0 {
            return Err(Error::Protocol("empty frame header"));
        }

        self.read_exact(header_length)
    }

    /// Sends a whole payload. While the selector is armed and selecting
    /// the payload is enqueued atomically instead, to be written by
    /// `drain_one` when the socket reports writable.
    pub fn send(&mut self, data: &[u8]) -> NetResult<()> {
        if self.is_selecting() {
            self.outgoing.push_back(data.to_vec());
            return Ok(());
        }

        self.stream.write_all(data)?;
        Ok(())
    }

    /// Dequeues and writes a single previously enqueued payload.
    pub fn drain_one(&mut self) -> NetResult<()> {
        if let Some(data) = self.outgoing.pop_front() {
            self.stream.write_all(&data)?;
        }

        Ok(())
    }

    /// Number of payloads waiting in the outbound queue.
    #[inline]
    pub fn pending(&self) -> usize {
        self.outgoing.len()
    }

    #[inline]
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    #[inline]
    fn is_selecting(&self) -> bool {
        self.poller.as_ref().map_or(false, Poller::is_selecting)
    }
}

impl<S: Read + Write + AsRawFd> Framer<S> {
    /// Attaches a readiness selector to the owned socket. Used only by
    /// service shells running an external event loop.
    pub fn arm_selector(&mut self) -> NetResult<()> {
        self.poller = Some(Poller::new(self.stream.as_raw_fd())?);
        Ok(())
    }

    #[inline]
    pub fn selector(&mut self) -> Option<&mut Poller> {
        self.poller.as_mut()
    }
}

impl Framer<TcpStream> {
    /// Closes both directions of the connection. In-flight reads on other
    /// threads fail with `ConnectionLost`.
    pub fn shutdown(&self) -> NetResult<()> {
        self.stream.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::MockStream;
    use std::net::TcpListener;

    #[test]
    fn test_read_exact() {
        let mut framer = Framer::new(MockStream::with_incoming(vec![1, 2, 3, 4, 5]));

        assert_eq!(framer.read_exact(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(framer.read_exact(2).unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_read_exact_connection_lost() {
        let mut framer = Framer::new(MockStream::with_incoming(vec![1, 2]));

        assert_eq!(framer.read_exact(3).unwrap_err(), Error::ConnectionLost);
    }

    #[test]
    fn test_read_header() {
        // Length byte 3, then the header, then trailing body bytes.
        let mut framer = Framer::new(MockStream::with_incoming(vec![3, 10, 11, 12, 99]));

        assert_eq!(framer.read_header().unwrap(), vec![10, 11, 12]);
        assert_eq!(framer.read_exact(1).unwrap(), vec![99]);
    }

    #[test]
    fn test_read_header_rejects_zero_length() {
        let mut framer = Framer::new(MockStream::with_incoming(vec![0]));

        assert_eq!(
            framer.read_header().unwrap_err(),
            Error::Protocol("empty frame header")
        );
    }

    #[test]
    fn test_send_synchronous_without_selector() {
        let mut framer = Framer::new(MockStream::new());

        framer.send(&[1, 2, 3]).unwrap();

        assert_eq!(framer.stream_mut().outgoing, vec![1, 2, 3]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_send_queues_while_selecting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_accepted, _) = listener.accept().unwrap();

        let mut framer = Framer::new(stream);
        framer.arm_selector().unwrap();
        framer.selector().unwrap().select().unwrap();

        framer.send(&[1, 2, 3]).unwrap();
        framer.send(&[4, 5]).unwrap();
        assert_eq!(framer.pending(), 2);

        // Each drain writes exactly one queued payload.
        framer.selector().unwrap().select().unwrap();
        if framer.selector().unwrap().is_writable() {
            framer.drain_one().unwrap();
        }
        assert_eq!(framer.pending(), 1);

        framer.drain_one().unwrap();
        framer.drain_one().unwrap();
        assert_eq!(framer.pending(), 0);
    }
}
