//! Authenticated, confidential point-to-point channels over TCP. Peers
//! negotiate a shared symmetric key during a handshake (with or without a
//! certificate authority in the loop) and then exchange typed,
//! length-framed, individually sealed messages until either side closes
//! the connection.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod ca;
pub mod net;
