//! Role-agnostic drivers around the protocol core: a stoppable listening
//! endpoint that handshakes every accepted connection on its own worker
//! thread, and the connector conveniences for the client side.

use crate::net::certificate::IssuedCertificate;
use crate::net::framer::Framer;
use crate::net::handshake;
use crate::net::poller::Poller;
use crate::net::session::Session;
use crate::net::support::{Error, NetResult};
use ferrite::crypto;
use ferrite::crypto::{RsaPrivateKey, RsaPublicKey};
use ferrite::logging;
use ferrite::session::SessionKey;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handshake discipline applied to every accepted connection.
pub enum HandshakeMode {
    Plain,
    Certified(IssuedCertificate),
}

/// Listening endpoint. Long-lived session workers are spawned per
/// connection; handshake failures are logged and the loop keeps
/// accepting.
pub struct Server {
    key: Arc<RsaPrivateKey>,
    mode: Arc<HandshakeMode>,
    listener: TcpListener,
    compress: bool,
    running: Arc<AtomicBool>,
    log: logging::Logger,
}

impl Server {
    /// Binds the listener. When no keypair is supplied a default-size
    /// one is generated.
    pub fn bind<'a, A: ToSocketAddrs, L: Into<Option<&'a logging::Logger>>>(
        addr: A,
        key: Option<RsaPrivateKey>,
        mode: HandshakeMode,
        compress: bool,
        log: L,
    ) -> NetResult<Server> {
        let key = match key {
            Some(key) => key,
            None => crypto::generate_keypair(ferrite::DEFAULT_KEY_BITS)
                .map_err(|_| Error::Protocol("keypair generation failed"))?,
        };

        let listener = TcpListener::bind(addr)?;

        Ok(Server {
            key: Arc::new(key),
            mode: Arc::new(mode),
            listener,
            compress,
            running: Arc::new(AtomicBool::new(false)),
            log: logging::child_or_discard(log.into()),
        })
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }

    /// Starts the accept loop on its own thread. The handler is invoked
    /// with each established session and owns it until it returns.
    pub fn start<F>(&self, handler: F) -> NetResult<thread::JoinHandle<()>>
    where
        F: Fn(Session<TcpStream>) + Send + Sync + 'static,
    {
        self.running.store(true, Ordering::SeqCst);

        let listener = self.listener.try_clone()?;
        let key = self.key.clone();
        let mode = self.mode.clone();
        let compress = self.compress;
        let running = self.running.clone();
        let handler = Arc::new(handler);
        let log = self.log.new(logging::o!());

        let handle = thread::spawn(move || {
            if let Err(err) = accept_loop(&listener, &key, &mode, compress, &running, &handler, &log)
            {
                logging::error!(log, "accept loop failed"; "error" => %err);
            }
        });

        Ok(handle)
    }

    /// Blocking accept loop on the calling thread. Runs until the
    /// listener itself fails; sessions are still handed to workers.
    pub fn run<F>(&self, handler: F) -> NetResult<()>
    where
        F: Fn(Session<TcpStream>) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer) = self.listener.accept()?;
            logging::debug!(self.log, "connection accepted"; "peer" => %peer);

            serve_connection(
                stream,
                self.key.clone(),
                self.mode.clone(),
                self.compress,
                handler.clone(),
                self.log.new(logging::o!()),
            );
        }
    }

    /// Signals the accept loop to wind down; it exits within one poll
    /// interval. Established sessions run to completion on their workers.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn accept_loop<F>(
    listener: &TcpListener,
    key: &Arc<RsaPrivateKey>,
    mode: &Arc<HandshakeMode>,
    compress: bool,
    running: &Arc<AtomicBool>,
    handler: &Arc<F>,
    log: &logging::Logger,
) -> NetResult<()>
where
    F: Fn(Session<TcpStream>) + Send + Sync + 'static,
{
    let mut poller = Poller::new(listener.as_raw_fd())?;

    while running.load(Ordering::SeqCst) {
        poller.select_timeout(Some(ACCEPT_POLL_INTERVAL))?;

        if !poller.is_readable() {
            continue;
        }

        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) => {
                logging::warn!(log, "accept failed"; "error" => %err);
                continue;
            }
        };

        logging::debug!(log, "connection accepted"; "peer" => %peer);

        serve_connection(
            stream,
            key.clone(),
            mode.clone(),
            compress,
            handler.clone(),
            log.new(logging::o!()),
        );
    }

    Ok(())
}

/// Handshakes one accepted connection on its own worker thread and hands
/// the established session to the handler.
fn serve_connection<F>(
    stream: TcpStream,
    key: Arc<RsaPrivateKey>,
    mode: Arc<HandshakeMode>,
    compress: bool,
    handler: Arc<F>,
    log: logging::Logger,
) where
    F: Fn(Session<TcpStream>) + Send + Sync + 'static,
{
    thread::spawn(move || {
        let mut framer = Framer::new(stream);

        let established = match &*mode {
            HandshakeMode::Plain => handshake::server_plain(&mut framer, &key),
            HandshakeMode::Certified(issued) => {
                handshake::server_certified(&mut framer, &key, issued)
            }
        };

        match established {
            Ok(session_key) => {
                logging::debug!(log, "handshake complete");
                let session = Session::new(framer, session_key, compress, Some(&log));
                (handler.as_ref())(session);
            }
            Err(err) => {
                logging::info!(log, "handshake failed"; "error" => %err);
            }
        }
    });
}

/// Connects and establishes a plain-mode session with a freshly
/// generated session key.
pub fn connect_plain<A: ToSocketAddrs>(addr: A, compress: bool) -> NetResult<Session<TcpStream>> {
    let stream = TcpStream::connect(addr)?;
    let mut framer = Framer::new(stream);

    let key = SessionKey::generate();
    handshake::client_plain(&mut framer, &key)?;

    Ok(Session::new(framer, key, compress, None))
}

/// Connects and establishes a certificate-verified session; the
/// listener's certificate must verify under `ca_key`.
pub fn connect_certified<A: ToSocketAddrs>(
    addr: A,
    ca_key: &RsaPublicKey,
    compress: bool,
) -> NetResult<Session<TcpStream>> {
    let stream = TcpStream::connect(addr)?;
    let mut framer = Framer::new(stream);

    let key = SessionKey::generate();
    handshake::client_certified(&mut framer, &key, ca_key)?;

    Ok(Session::new(framer, key, compress, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::data::Message;
    use crate::net::testing::TEST_PEER_KEY;
    use std::fs;
    use std::sync::mpsc;
    use std::sync::Mutex;

    fn start_plain_server<F>(handler: F) -> (Server, thread::JoinHandle<()>, SocketAddr)
    where
        F: Fn(Session<TcpStream>) + Send + Sync + 'static,
    {
        let server = Server::bind(
            "127.0.0.1:0",
            Some(TEST_PEER_KEY.clone()),
            HandshakeMode::Plain,
            false,
            None,
        )
        .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.start(handler).unwrap();

        (server, handle, addr)
    }

    #[test]
    fn test_plain_text_echo() {
        let (server, handle, addr) = start_plain_server(|mut session| {
            match session.receive().unwrap() {
                Message::Text(text) => assert_eq!(text, "hello"),
                other => panic!("Unexpected message {:?}", other),
            }
            session.send_text("hi").unwrap();
        });

        let mut session = connect_plain(addr, false).unwrap();
        session.send_text("hello").unwrap();

        assert_eq!(
            session.receive().unwrap(),
            Message::Text("hi".to_string())
        );

        server.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_chunked_transfer_with_autosave() {
        // 5 MiB, streamed in 1 KiB slices and autosaved at the receiver.
        let content: Vec<u8> = (0..5 * 1024 * 1024u32)
            .map(|value| (value % 239) as u8)
            .collect();

        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("blob.bin");
        fs::write(&source, &content).unwrap();

        let target_dir = tempfile::tempdir().unwrap();
        let target_path = target_dir.path().to_path_buf();

        let (sender, receiver) = mpsc::channel();
        let sender = Mutex::new(sender);

        let (server, handle, addr) = {
            let target_path = target_path.clone();
            start_plain_server(move |mut session| {
                session.set_autosave(true);
                session.set_target_dir(&target_path);

                let received = session.receive().unwrap();
                sender.lock().unwrap().send(received).unwrap();
            })
        };

        let mut session = connect_plain(addr, false).unwrap();
        session.set_max_chunk(1024);
        session.send_file(&source).unwrap();

        let received = receiver.recv_timeout(Duration::from_secs(60)).unwrap();
        match received {
            Message::SavedFile(saved) => {
                assert_eq!(saved.name, "blob.bin");
                assert_eq!(saved.size, content.len() as u64);
            }
            other => panic!("Unexpected message {:?}", other),
        }

        assert_eq!(fs::read(target_path.join("blob.bin")).unwrap(), content);

        server.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_server_keeps_accepting_after_failed_handshake() {
        let (server, handle, addr) = start_plain_server(|mut session| {
            if let Ok(Message::Text(text)) = session.receive() {
                session.send_text(&text).unwrap();
            }
        });

        // A connection that opens and closes mid-handshake must not take
        // the endpoint down.
        drop(TcpStream::connect(addr).unwrap());

        let mut session = connect_plain(addr, false).unwrap();
        session.send_text("still alive").unwrap();
        assert_eq!(
            session.receive().unwrap(),
            Message::Text("still alive".to_string())
        );

        server.stop();
        handle.join().unwrap();
    }
}
