use mio::unix::{EventedFd, UnixReady};
use mio::{Events, Poll, PollOpt, Ready, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Readiness selector over a single owned descriptor. The protocol layer
/// itself is strictly blocking; this exists so an external event loop can
/// test a socket for readability/writability before committing to an
/// operation, and so queued sends can be drained cooperatively.
pub struct Poller {
    poll: Poll,
    events: Events,
    ready: Ready,
    selecting: bool,
}

impl Poller {
    const TOKEN: Token = Token(0);

    /// Registers the descriptor level-triggered for both directions.
    pub fn new(fd: RawFd) -> io::Result<Poller> {
        let poll = Poll::new()?;

        poll.register(
            &EventedFd(&fd),
            Self::TOKEN,
            Ready::readable() | Ready::writable(),
            PollOpt::level(),
        )?;

        Ok(Poller {
            poll,
            events: Events::with_capacity(8),
            ready: Ready::empty(),
            selecting: false,
        })
    }

    /// Samples the current readiness without blocking.
    #[inline]
    pub fn select(&mut self) -> io::Result<()> {
        self.select_timeout(Some(Duration::from_millis(0)))
    }

    /// Samples readiness, waiting up to `timeout` for an event. Used by
    /// accept loops that would otherwise spin.
    pub fn select_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.selecting = true;
        self.ready = Ready::empty();

        self.poll.poll(&mut self.events, timeout)?;

        for event in &self.events {
            self.ready.insert(event.readiness());
        }

        Ok(())
    }

    /// Leaves select mode; queued sends flow synchronously again.
    #[inline]
    pub fn quit_select(&mut self) {
        self.selecting = false;
    }

    #[inline]
    pub fn is_selecting(&self) -> bool {
        self.selecting
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.ready.is_readable()
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.ready.is_writable()
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        let unix_ready = UnixReady::from(self.ready);
        unix_ready.is_error() || unix_ready.is_hup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_connected_stream_readiness() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut accepted, _) = listener.accept().unwrap();

        let mut poller = Poller::new(stream.as_raw_fd()).unwrap();

        // A freshly connected socket is writable but has nothing to read.
        poller.select().unwrap();
        assert!(poller.is_selecting());
        assert!(poller.is_writable());
        assert!(!poller.is_readable());

        accepted.write_all(b"ping").unwrap();

        // The socket stays writable, so the poll returns immediately;
        // retry until the loopback delivery shows up.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !poller.is_readable() && std::time::Instant::now() < deadline {
            poller.select().unwrap();
        }
        assert!(poller.is_readable());

        poller.quit_select();
        assert!(!poller.is_selecting());
    }
}
