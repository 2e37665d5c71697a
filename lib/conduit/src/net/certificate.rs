use crate::net::support::{Error, NetResult};
use ferrite::crypto;
use ferrite::crypto::RsaPublicKey;
use serde_derive::{Deserialize, Serialize};

/// Inclusive validity window in unix epoch milliseconds.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
pub struct Validity {
    pub not_before_ms: i64,
    pub not_after_ms: i64,
}

impl Validity {
    #[inline]
    pub fn contains(&self, now_ms: i64) -> bool {
        self.not_before_ms <= now_ms && now_ms <= self.not_after_ms
    }
}

/// A binding of subject id, subject public key (DER) and validity window,
/// immutable after issuance. The authority's signature travels alongside
/// as a detached value and covers the canonical serialization.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Certificate {
    pub id: String,
    pub public_key: Vec<u8>,
    pub validity: Validity,
}

impl Certificate {
    #[inline]
    pub fn new(id: String, public_key: Vec<u8>, validity: Validity) -> Certificate {
        Certificate {
            id,
            public_key,
            validity,
        }
    }

    /// Canonical byte image of the triple. Signatures are computed and
    /// verified over exactly these bytes on every party, so the encoding
    /// (bincode: fixed-width little-endian integers, u64 length-prefixed
    /// fields) must never change within a deployment.
    pub fn serialize(&self) -> NetResult<Vec<u8>> {
        bincode::serialize(self).map_err(|_| Error::Protocol("certificate serialization failed"))
    }

    pub fn deserialize(data: &[u8]) -> NetResult<Certificate> {
        bincode::deserialize(data).map_err(|_| Error::Protocol("malformed certificate"))
    }

    /// True iff the signature covers this certificate's serialization
    /// under the supplied authority key.
    pub fn verify(&self, ca_key: &RsaPublicKey, signature: &[u8]) -> bool {
        match self.serialize() {
            Ok(image) => crypto::pss_verify(ca_key, &crypto::sha256(&image), signature),
            Err(_) => false,
        }
    }

    #[inline]
    pub fn is_within_validity(&self, now_ms: i64) -> bool {
        self.validity.contains(now_ms)
    }

    /// Imports the embedded subject public key.
    pub fn subject_key(&self) -> NetResult<RsaPublicKey> {
        crypto::import_public_der(&self.public_key).map_err(|_| Error::CertificateRejected)
    }
}

/// Serialized certificate plus detached signature, the pair handed out by
/// the authority and presented during the handshake.
#[derive(Clone, Debug)]
pub struct IssuedCertificate {
    pub certificate: Vec<u8>,
    pub signature: Vec<u8>,
}
