//! Key establishment. The protocol is hybrid: asymmetric keys bootstrap a
//! 16-byte symmetric session key, which protects all traffic afterwards.
//!
//! Two modes. Plain mode is a bare key exchange that authenticates
//! neither party: the listener ships its public key, the connector wraps
//! a fresh session key under it. Certificate mode has the listener
//! present an authority-signed certificate first; the connector verifies
//! the signature and validity window, approves or rejects, and wraps the
//! session key under the certified subject key.
//!
//! The exchange is linear with no retries. Any failure leaves the framer
//! unusable; callers drop it and the connection with it.

use crate::net::certificate::{Certificate, IssuedCertificate};
use crate::net::frame::Tag;
use crate::net::framer::Framer;
use crate::net::support::{Error, NetResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ferrite::crypto;
use ferrite::crypto::{RsaPrivateKey, RsaPublicKey};
use ferrite::session::SessionKey;
use ferrite::time::timestamp_millis;
use std::convert::TryFrom;
use std::io::{Cursor, Read, Write};

// Upper bounds on the variable-length handshake segments. A DER public
// key or a signature past these sizes is not something a peer of this
// protocol produces.
const MAX_KEY_SEGMENT: usize = 16 * 1024;
const MAX_CERT_SEGMENT: usize = 64 * 1024;

/// Listener role, plain mode. Publishes the public key and returns the
/// session key the connector wrapped under it.
pub fn server_plain<S: Read + Write>(
    framer: &mut Framer<S>,
    key: &RsaPrivateKey,
) -> NetResult<SessionKey> {
    let public_der = crypto::export_public_der(&key.to_public_key())
        .map_err(|_| Error::Protocol("public key export failed"))?;

    let mut pack = Vec::with_capacity(4 + public_der.len());
    pack.write_u32::<BigEndian>(public_der.len() as u32)?;
    pack.extend_from_slice(&public_der);
    framer.send(&pack)?;

    receive_session_key(framer, key)
}

/// Connector role, plain mode. Reads the listener's public key and wraps
/// the caller-supplied session key under it.
pub fn client_plain<S: Read + Write>(
    framer: &mut Framer<S>,
    session_key: &SessionKey,
) -> NetResult<()> {
    let length_bytes = framer.read_exact(4)?;
    let length = Cursor::new(length_bytes).read_u32::<BigEndian>()? as usize;

    if length > MAX_KEY_SEGMENT {
        return Err(Error::Protocol("public key segment too large"));
    }

    let public_der = framer.read_exact(length)?;
    let server_key = crypto::import_public_der(&public_der)
        .map_err(|_| Error::Protocol("malformed server public key"))?;

    send_session_key(framer, session_key, &server_key)
}

/// Listener role, certificate mode. Presents the issued certificate,
/// awaits the connector's verdict and, on approval, unwraps the session
/// key. A `CERT_FAILED` verdict surfaces as `CertificateRejected`.
pub fn server_certified<S: Read + Write>(
    framer: &mut Framer<S>,
    key: &RsaPrivateKey,
    issued: &IssuedCertificate,
) -> NetResult<SessionKey> {
    let mut pack = Vec::with_capacity(10 + issued.certificate.len() + issued.signature.len());
    pack.write_u8(9)?;
    pack.write_u8(Tag::SendCertificate.into())?;
    pack.write_u32::<BigEndian>(issued.certificate.len() as u32)?;
    pack.write_u32::<BigEndian>(issued.signature.len() as u32)?;
    pack.extend_from_slice(&issued.certificate);
    pack.extend_from_slice(&issued.signature);
    framer.send(&pack)?;

    let response = framer.read_header()?;
    if response.len() != 1 {
        return Err(Error::Protocol("malformed certificate response"));
    }

    match Tag::try_from(response[0])? {
        Tag::CertFailed => Err(Error::CertificateRejected),
        Tag::CertSucceeded => receive_session_key(framer, key),
        _ => Err(Error::Protocol("unexpected certificate response")),
    }
}

/// Connector role, certificate mode. Verifies the presented certificate
/// against the known authority key and its validity window before
/// approving the exchange and wrapping the session key under the
/// certified subject key.
pub fn client_certified<S: Read + Write>(
    framer: &mut Framer<S>,
    session_key: &SessionKey,
    ca_key: &RsaPublicKey,
) -> NetResult<()> {
    let header = framer.read_header()?;
    if header.len() != 9 {
        return Err(Error::Protocol("malformed certificate header"));
    }

    let mut cursor = Cursor::new(header);
    if Tag::try_from(cursor.read_u8()?)? != Tag::SendCertificate {
        return Err(Error::Protocol("expected certificate packet"));
    }

    let cert_len = cursor.read_u32::<BigEndian>()? as usize;
    let signature_len = cursor.read_u32::<BigEndian>()? as usize;

    if cert_len > MAX_CERT_SEGMENT || signature_len > MAX_CERT_SEGMENT {
        return Err(Error::Protocol("certificate segment too large"));
    }

    let cert_data = framer.read_exact(cert_len)?;
    let signature = framer.read_exact(signature_len)?;

    // The signature covers the raw certificate bytes, so it is checked
    // before any deserialization.
    if !crypto::pss_verify(ca_key, &crypto::sha256(&cert_data), &signature) {
        respond(framer, Tag::CertFailed)?;
        return Err(Error::CertificateRejected);
    }

    let certificate = Certificate::deserialize(&cert_data)?;

    if !certificate.is_within_validity(timestamp_millis()) {
        respond(framer, Tag::CertFailed)?;
        return Err(Error::CertificateRejected);
    }

    let subject_key = match certificate.subject_key() {
        Ok(subject_key) => subject_key,
        Err(_) => {
            respond(framer, Tag::CertFailed)?;
            return Err(Error::CertificateRejected);
        }
    };

    respond(framer, Tag::CertSucceeded)?;
    send_session_key(framer, session_key, &subject_key)
}

/// One-byte-framed handshake verdict.
fn respond<S: Read + Write>(framer: &mut Framer<S>, tag: Tag) -> NetResult<()> {
    framer.send(&[1u8, u8::from(tag)])
}

/// Wraps the session key under the peer public key and frames it as a
/// `SEND_SESSION_KEY` packet.
fn send_session_key<S: Read + Write>(
    framer: &mut Framer<S>,
    session_key: &SessionKey,
    peer_key: &RsaPublicKey,
) -> NetResult<()> {
    let wrapped = crypto::oaep_encrypt(peer_key, &session_key[..])
        .map_err(|_| Error::Protocol("session key wrap failed"))?;

    let mut pack = Vec::with_capacity(6 + wrapped.len());
    pack.write_u8(5)?;
    pack.write_u8(Tag::SendSessionKey.into())?;
    pack.write_u32::<BigEndian>(wrapped.len() as u32)?;
    pack.extend_from_slice(&wrapped);

    framer.send(&pack)
}

/// Awaits a `SEND_SESSION_KEY` packet and unwraps it with the private
/// half of the published (or certified) key.
fn receive_session_key<S: Read + Write>(
    framer: &mut Framer<S>,
    key: &RsaPrivateKey,
) -> NetResult<SessionKey> {
    let header = framer.read_header()?;
    if header.len() != 5 {
        return Err(Error::Protocol("malformed session key header"));
    }

    let mut cursor = Cursor::new(header);
    if Tag::try_from(cursor.read_u8()?)? != Tag::SendSessionKey {
        return Err(Error::Protocol("expected session key packet"));
    }

    let key_len = cursor.read_u32::<BigEndian>()? as usize;
    if key_len > MAX_KEY_SEGMENT {
        return Err(Error::Protocol("wrapped key segment too large"));
    }

    let wrapped = framer.read_exact(key_len)?;
    let plain = crypto::oaep_decrypt(key, &wrapped)?;

    SessionKey::from_slice(&plain).ok_or(Error::Protocol("session key must be 16 bytes"))
}
