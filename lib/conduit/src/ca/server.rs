use crate::ca::database::Database;
use crate::ca::CERT_VALIDITY_MS;
use crate::net::certificate::{Certificate, Validity};
use crate::net::frame::{read_segment_len, Tag};
use crate::net::framer::Framer;
use crate::net::poller::Poller;
use crate::net::support::{Error, NetResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ferrite::crypto;
use ferrite::crypto::RsaPrivateKey;
use ferrite::logging;
use ferrite::time::timestamp_millis;
use std::convert::TryFrom;
use std::io::Cursor;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Certificate authority server. Owns the authority keypair and the
/// enrollment database, verifies one credential pair per connection and
/// answers with a signed certificate or a denial.
///
/// Clients must be enrolled in advance, and anyone verifying issued
/// certificates must hold the current authority public key.
pub struct CaServer {
    key: Arc<RsaPrivateKey>,
    database: Arc<Mutex<Database>>,
    listener: TcpListener,
    running: Arc<AtomicBool>,
    log: logging::Logger,
}

impl CaServer {
    /// Binds the listener. Bind failures propagate so operators can exit
    /// nonzero.
    pub fn bind<'a, A: ToSocketAddrs, L: Into<Option<&'a logging::Logger>>>(
        addr: A,
        key: RsaPrivateKey,
        database: Database,
        log: L,
    ) -> NetResult<CaServer> {
        let listener = TcpListener::bind(addr)?;

        Ok(CaServer {
            key: Arc::new(key),
            database: Arc::new(Mutex::new(database)),
            listener,
            running: Arc::new(AtomicBool::new(false)),
            log: logging::child_or_discard(log.into()),
        })
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }

    /// Shared handle to the enrollment database, for operator tooling
    /// running alongside the accept loop.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.database.clone()
    }

    /// Starts the accept loop on its own thread. Each accepted connection
    /// is served by a short-lived worker: one request, one response.
    pub fn start(&self) -> NetResult<thread::JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);

        let listener = self.listener.try_clone()?;
        let key = self.key.clone();
        let database = self.database.clone();
        let running = self.running.clone();
        let log = self.log.new(logging::o!());

        let handle = thread::spawn(move || {
            if let Err(err) = accept_loop(&listener, &key, &database, &running, &log) {
                logging::error!(log, "authority accept loop failed"; "error" => %err);
            }
        });

        Ok(handle)
    }

    /// Signals the accept loop to wind down; it exits within one poll
    /// interval.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn accept_loop(
    listener: &TcpListener,
    key: &Arc<RsaPrivateKey>,
    database: &Arc<Mutex<Database>>,
    running: &Arc<AtomicBool>,
    log: &logging::Logger,
) -> NetResult<()> {
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

        logging::debug!(log, "certificate request connection"; "peer" => %peer);

        let key = key.clone();
        let database = database.clone();
        let worker_log = log.new(logging::o!());

        thread::spawn(move || {
            let mut framer = Framer::new(stream);

            if let Err(err) = handle_request(&mut framer, &key, &database, &worker_log) {
                logging::info!(worker_log, "certificate request failed"; "error" => %err);
            }
        });
    }

    Ok(())
}

/// One request/response exchange per connection: decrypt the credential
/// pair, check it against the database and grant or deny.
fn handle_request(
    framer: &mut Framer<TcpStream>,
    key: &RsaPrivateKey,
    database: &Mutex<Database>,
    log: &logging::Logger,
) -> NetResult<()> {
    let header = framer.read_header()?;
    if header.len() != 13 {
        return Err(Error::Protocol("malformed certificate request header"));
    }

    let mut cursor = Cursor::new(header);
    if Tag::try_from(cursor.read_u8()?)? != Tag::RequestCertificate {
        return Err(Error::Protocol("expected certificate request"));
    }

    let id_len = read_segment_len(&mut cursor)?;
    let password_len = read_segment_len(&mut cursor)?;
    let key_len = read_segment_len(&mut cursor)?;

    let cipher_id = framer.read_exact(id_len)?;
    let cipher_password = framer.read_exact(password_len)?;
    let public_der = framer.read_exact(key_len)?;

    let client_id = decrypt_utf8(key, &cipher_id)?;
    let password = decrypt_utf8(key, &cipher_password)?;

    // Refresh the record inside the same lock scope as the check so the
    // validity window and access time stay per-record atomic.
    let granted = {
        let mut database = database.lock().expect("Authority database poisoned");

        if database.verify(&client_id, &password) {
            let now = timestamp_millis();
            let validity = Validity {
                not_before_ms: now,
                not_after_ms: now + CERT_VALIDITY_MS,
            };

            let record = database
                .get_mut(&client_id)
                .expect("Verified record must exist");
            record.validity = Some(validity);
            record.recent_public_key = Some(public_der.clone());
            record.update_access_time();

            Some(validity)
        } else {
            None
        }
    };

    match granted {
        Some(validity) => {
            logging::info!(log, "certificate granted";
                           "id" => %client_id,
                           "not_after_ms" => validity.not_after_ms);
            grant(framer, key, client_id, public_der, validity)
        }
        None => {
            logging::info!(log, "certificate denied"; "id" => %client_id);
            framer.send(&[1u8, u8::from(Tag::CertificateDenied)])
        }
    }
}

fn grant(
    framer: &mut Framer<TcpStream>,
    key: &RsaPrivateKey,
    client_id: String,
    public_der: Vec<u8>,
    validity: Validity,
) -> NetResult<()> {
    let certificate = Certificate::new(client_id, public_der, validity);
    let image = certificate.serialize()?;
    let signature = crypto::pss_sign(key, &crypto::sha256(&image))
        .map_err(|_| Error::Protocol("certificate signing failed"))?;

    let mut pack = Vec::with_capacity(10 + image.len() + signature.len());
    pack.write_u8(9)?;
    pack.write_u8(Tag::CertificateGranted.into())?;
    pack.write_u32::<BigEndian>(image.len() as u32)?;
    pack.write_u32::<BigEndian>(signature.len() as u32)?;
    pack.extend_from_slice(&image);
    pack.extend_from_slice(&signature);

    framer.send(&pack)
}

fn decrypt_utf8(key: &RsaPrivateKey, cipher: &[u8]) -> NetResult<String> {
    let plain = crypto::oaep_decrypt(key, cipher)?;
    String::from_utf8(plain).map_err(|_| Error::Protocol("credential is not valid utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::client::request_certificate;
    use crate::ca::database::ClientRecord;
    use crate::net::testing::{TEST_CA_KEY, TEST_PEER_KEY};

    fn start_authority(records: Vec<ClientRecord>) -> (CaServer, thread::JoinHandle<()>, SocketAddr) {
        let mut database = Database::new();
        for record in records {
            database.add(record);
        }

        let server = CaServer::bind("127.0.0.1:0", TEST_CA_KEY.clone(), database, None).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.start().unwrap();

        (server, handle, addr)
    }

    #[test]
    fn test_grants_to_enrolled_client() {
        let (server, handle, addr) =
            start_authority(vec![ClientRecord::new("svc1", "pw", None)]);

        let issued = request_certificate(
            "svc1",
            "pw",
            &TEST_PEER_KEY.to_public_key(),
            &TEST_CA_KEY.to_public_key(),
            addr,
        )
        .unwrap();

        let certificate = Certificate::deserialize(&issued.certificate).unwrap();
        assert_eq!(certificate.id, "svc1");
        assert!(certificate.verify(&TEST_CA_KEY.to_public_key(), &issued.signature));
        assert!(certificate.is_within_validity(timestamp_millis()));
        assert_eq!(
            certificate.validity.not_after_ms - certificate.validity.not_before_ms,
            CERT_VALIDITY_MS
        );

        // Issuance refreshes the record.
        {
            let database = server.database();
            let database = database.lock().unwrap();
            let record = database.get("svc1").unwrap();
            assert!(record.validity.is_some());
            assert_eq!(
                record.recent_public_key.as_deref().unwrap(),
                &crypto::export_public_der(&TEST_PEER_KEY.to_public_key()).unwrap()[..]
            );
        }

        server.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_denies_unknown_id() {
        let (server, handle, addr) =
            start_authority(vec![ClientRecord::new("svc1", "pw", None)]);

        let result = request_certificate(
            "ghost",
            "pw",
            &TEST_PEER_KEY.to_public_key(),
            &TEST_CA_KEY.to_public_key(),
            addr,
        );

        assert_eq!(result.unwrap_err(), Error::CertificateDenied);

        server.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_denies_wrong_password() {
        let (server, handle, addr) =
            start_authority(vec![ClientRecord::new("svc1", "pw", None)]);

        let result = request_certificate(
            "svc1",
            "not-the-password",
            &TEST_PEER_KEY.to_public_key(),
            &TEST_CA_KEY.to_public_key(),
            addr,
        );

        assert_eq!(result.unwrap_err(), Error::CertificateDenied);

        server.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_issued_certificate_drives_handshake() {
        use crate::net::framer::Framer;
        use crate::net::handshake;
        use crate::net::session::Session;
        use crate::net::testing::tcp_pair;
        use ferrite::session::SessionKey;
        use serde_json::json;

        let (server, handle, addr) =
            start_authority(vec![ClientRecord::new("svc1", "pw", None)]);

        let issued = request_certificate(
            "svc1",
            "pw",
            &TEST_PEER_KEY.to_public_key(),
            &TEST_CA_KEY.to_public_key(),
            addr,
        )
        .unwrap();

        server.stop();
        handle.join().unwrap();

        // The certified listener completes a handshake and a structured
        // payload round-trips over the established session.
        let (client_stream, server_stream) = tcp_pair();

        let listener = thread::spawn(move || {
            let mut framer = Framer::new(server_stream);
            let key = handshake::server_certified(&mut framer, &TEST_PEER_KEY, &issued).unwrap();
            let mut session = Session::new(framer, key, false, None);

            session.receive().unwrap()
        });

        let mut framer = Framer::new(client_stream);
        let key = SessionKey::generate();
        handshake::client_certified(&mut framer, &key, &TEST_CA_KEY.to_public_key()).unwrap();
        let mut session = Session::new(framer, key, false, None);

        let mut object = serde_json::Map::new();
        object.insert("k".to_string(), json!(42));
        session.send_object(&object).unwrap();

        match listener.join().unwrap() {
            crate::net::data::Message::Object(received) => assert_eq!(received, object),
            other => panic!("Unexpected message {:?}", other),
        }
    }
}
