use ferrite::crypto::CryptoError;
use std::error;
use std::fmt;
use std::io;

/// Flat error space of the protocol. Every failure terminates the
/// affected connection; nothing is retried below the service shell.
#[derive(Debug)]
pub enum Error {
    /// EOF or a connection-class I/O failure during a framed read/write.
    ConnectionLost,
    /// Malformed frame, unknown tag or an unreasonable declared length.
    Protocol(&'static str),
    /// The AEAD could not run over the supplied segments.
    DecryptionFailed,
    /// The authentication tag did not match. Treat as active tampering.
    VerificationFailed,
    /// Certificate signature invalid, outside its validity window, or the
    /// peer reported a failed verification.
    CertificateRejected,
    /// The certificate authority denied the enrollment request.
    CertificateDenied,
    /// Any other I/O failure (disk access during file transfer, bind
    /// errors and the like).
    Io(io::Error),
}

pub type NetResult<T> = Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Error::ConnectionLost,
            _ => Error::Io(err),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::VerificationFailed => Error::VerificationFailed,
            _ => Error::DecryptionFailed,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ConnectionLost => write!(f, "connection is lost"),
            Error::Protocol(detail) => write!(f, "protocol violation: {}", detail),
            Error::DecryptionFailed => write!(f, "decryption failed"),
            Error::VerificationFailed => write!(f, "message authentication failed"),
            Error::CertificateRejected => write!(f, "certificate rejected"),
            Error::CertificateDenied => write!(f, "certificate request denied"),
            Error::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl error::Error for Error {}

// IO payloads carry no useful identity for equality; comparing their kinds
// keeps error values assertable in tests.
impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        match (self, other) {
            (Error::ConnectionLost, Error::ConnectionLost) => true,
            (Error::Protocol(left), Error::Protocol(right)) => left == right,
            (Error::DecryptionFailed, Error::DecryptionFailed) => true,
            (Error::VerificationFailed, Error::VerificationFailed) => true,
            (Error::CertificateRejected, Error::CertificateRejected) => true,
            (Error::CertificateDenied, Error::CertificateDenied) => true,
            (Error::Io(left), Error::Io(right)) => left.kind() == right.kind(),
            _ => false,
        }
    }
}
