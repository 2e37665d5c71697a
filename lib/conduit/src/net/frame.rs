use crate::net::support::{Error, NetResult};
use byteorder::{BigEndian, ReadBytesExt};
use std::convert::TryFrom;
use std::io::Cursor;

/// Largest single segment a peer may declare in any header.
pub(crate) const MAX_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Reads one u32 big-endian segment length out of a header, rejecting
/// anything past the segment bound.
#[inline]
pub(crate) fn read_segment_len(cursor: &mut Cursor<Vec<u8>>) -> NetResult<usize> {
    let length = cursor.read_u32::<BigEndian>()? as usize;

    if length > MAX_SEGMENT_SIZE {
        return Err(Error::Protocol("declared length exceeds bounds"));
    }

    Ok(length)
}

/// Wire tags. The numeric values are private to this implementation but
/// must match between every peer of a deployment, the certificate
/// authority included.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Tag {
    RequestCertificate = 1,
    CertificateGranted = 2,
    CertificateDenied = 3,
    SendCertificate = 4,
    CertSucceeded = 5,
    CertFailed = 6,
    SendSessionKey = 7,
    SendBytes = 8,
    SendText = 9,
    SendFile = 10,
    SendCompleteFile = 11,
    SendObject = 12,
    SendList = 13,
}

impl From<Tag> for u8 {
    #[inline]
    fn from(tag: Tag) -> Self {
        tag as u8
    }
}

impl TryFrom<u8> for Tag {
    type Error = Error;

    #[inline]
    fn try_from(value: u8) -> Result<Tag, Error> {
        Ok(match value {
            1 => Tag::RequestCertificate,
            2 => Tag::CertificateGranted,
            3 => Tag::CertificateDenied,
            4 => Tag::SendCertificate,
            5 => Tag::CertSucceeded,
            6 => Tag::CertFailed,
            7 => Tag::SendSessionKey,
            8 => Tag::SendBytes,
            9 => Tag::SendText,
            10 => Tag::SendFile,
            11 => Tag::SendCompleteFile,
            12 => Tag::SendObject,
            13 => Tag::SendList,
            _ => return Err(Error::Protocol("unknown message tag")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_byte_roundtrip() {
        for value in 1u8..=13 {
            let tag = Tag::try_from(value).unwrap();
            assert_eq!(u8::from(tag), value);
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(
            Tag::try_from(0).unwrap_err(),
            Error::Protocol("unknown message tag")
        );
        assert_eq!(
            Tag::try_from(14).unwrap_err(),
            Error::Protocol("unknown message tag")
        );
    }
}
