use crate::net::certificate::IssuedCertificate;
use crate::net::frame::{read_segment_len, Tag};
use crate::net::framer::Framer;
use crate::net::support::{Error, NetResult};
use byteorder::{BigEndian, WriteBytesExt};
use ferrite::crypto;
use ferrite::crypto::RsaPublicKey;
use std::convert::TryFrom;
use std::io::Cursor;
use std::net::{TcpStream, ToSocketAddrs};

/// Enrollment identity presented to the authority. The id and password
/// travel OAEP-wrapped under the authority's public key; the subject key
/// travels in the clear and is bound by the returned signature.
pub struct Credentials {
    pub id: String,
    pub password: String,
    pub public_key: RsaPublicKey,
}

/// One-shot requesting client: a fresh connection, one request/response
/// exchange, then the connection is dropped.
pub struct CaClient {
    credentials: Credentials,
    ca_public_key: RsaPublicKey,
}

impl CaClient {
    pub fn new(credentials: Credentials, ca_public_key: RsaPublicKey) -> CaClient {
        CaClient {
            credentials,
            ca_public_key,
        }
    }

    /// Connects to the authority and requests a signed certificate.
    /// A denial surfaces as `CertificateDenied`.
    pub fn run<A: ToSocketAddrs>(&self, addr: A) -> NetResult<IssuedCertificate> {
        let stream = TcpStream::connect(addr)?;
        let mut framer = Framer::new(stream);

        self.request(&mut framer)?;
        self.response(&mut framer)
    }

    fn request(&self, framer: &mut Framer<TcpStream>) -> NetResult<()> {
        let cipher_id = crypto::oaep_encrypt(&self.ca_public_key, self.credentials.id.as_bytes())
            .map_err(|_| Error::Protocol("credential encryption failed"))?;
        let cipher_password =
            crypto::oaep_encrypt(&self.ca_public_key, self.credentials.password.as_bytes())
                .map_err(|_| Error::Protocol("credential encryption failed"))?;
        let public_der = crypto::export_public_der(&self.credentials.public_key)
            .map_err(|_| Error::Protocol("public key export failed"))?;

        let mut pack = Vec::with_capacity(
            14 + cipher_id.len() + cipher_password.len() + public_der.len(),
        );
        pack.write_u8(13)?;
        pack.write_u8(Tag::RequestCertificate.into())?;
        pack.write_u32::<BigEndian>(cipher_id.len() as u32)?;
        pack.write_u32::<BigEndian>(cipher_password.len() as u32)?;
        pack.write_u32::<BigEndian>(public_der.len() as u32)?;
        pack.extend_from_slice(&cipher_id);
        pack.extend_from_slice(&cipher_password);
        pack.extend_from_slice(&public_der);

        framer.send(&pack)
    }

    fn response(&self, framer: &mut Framer<TcpStream>) -> NetResult<IssuedCertificate> {
        let header = framer.read_header()?;

        match Tag::try_from(header[0])? {
            Tag::CertificateGranted => {
                if header.len() != 9 {
                    return Err(Error::Protocol("malformed grant header"));
                }

                let mut cursor = Cursor::new(header);
                cursor.set_position(1);
                let cert_len = read_segment_len(&mut cursor)?;
                let signature_len = read_segment_len(&mut cursor)?;

                Ok(IssuedCertificate {
                    certificate: framer.read_exact(cert_len)?,
                    signature: framer.read_exact(signature_len)?,
                })
            }
            Tag::CertificateDenied => Err(Error::CertificateDenied),
            _ => Err(Error::Protocol("unexpected authority response")),
        }
    }
}

/// Convenience wrapper for the common flow: build credentials, run the
/// client, hand back the issued pair.
pub fn request_certificate<A: ToSocketAddrs>(
    id: &str,
    password: &str,
    public_key: &RsaPublicKey,
    ca_public_key: &RsaPublicKey,
    addr: A,
) -> NetResult<IssuedCertificate> {
    let credentials = Credentials {
        id: id.to_string(),
        password: password.to_string(),
        public_key: public_key.clone(),
    };

    CaClient::new(credentials, ca_public_key.clone()).run(addr)
}
