//! The sealed message layer. Every payload travels in its own frame:
//! a one-byte header length, a type-tagged header declaring the exact
//! segment lengths that follow, and the segments themselves. Payload
//! bodies are individually AEAD-sealed under the session key with a
//! fresh nonce per frame; compression, when enabled, is applied to the
//! plaintext before sealing and the flag travels in the clear.

use crate::net::data::{FileData, FileRef, Message};
use crate::net::frame::{read_segment_len, Tag};
use crate::net::framer::Framer;
use crate::net::support::{Error, NetResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ferrite::crypto;
use ferrite::logging;
use ferrite::session::SessionKey;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::TryFrom;
use std::fs;
use std::io;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

// Header sizes per frame type, excluding the framing length byte itself.
const BYTES_HEADER_SIZE: u8 = 14;
const FILE_ANNOUNCE_HEADER_SIZE: u8 = 13;
const COMPLETE_FILE_HEADER_SIZE: u8 = 26;
const OBJECT_HEADER_SIZE: u8 = 6;

/// Default slice size for chunked file transfer.
const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Announce record for a chunked file transfer; `size` counts
/// uncompressed content bytes.
#[derive(Serialize, Deserialize)]
struct FileAnnounce {
    name: String,
    size: u64,
}

/// Outer container of a structured payload frame.
#[derive(Serialize, Deserialize)]
struct SealedEnvelope {
    nonce: Vec<u8>,
    mac: Vec<u8>,
    object: Vec<u8>,
}

/// One established peer-to-peer session. Owns the framer and the session
/// key for its lifetime; once any receive fails the session is dead and
/// must be discarded along with the connection.
pub struct Session<S: Read + Write> {
    framer: Framer<S>,
    key: SessionKey,
    compress: bool,
    autosave: bool,
    max_chunk: usize,
    target_dir: PathBuf,
    log: logging::Logger,
}

impl<S: Read + Write> Session<S> {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        framer: Framer<S>,
        key: SessionKey,
        compress: bool,
        log: L,
    ) -> Session<S> {
        Session {
            framer,
            key,
            compress,
            autosave: false,
            max_chunk: DEFAULT_CHUNK_SIZE,
            target_dir: PathBuf::from("."),
            log: logging::child_or_discard(log.into()),
        }
    }

    /// When set, incoming chunked files are written to the target
    /// directory as their chunks arrive instead of being accumulated in
    /// memory.
    #[inline]
    pub fn set_autosave(&mut self, autosave: bool) {
        self.autosave = autosave;
    }

    /// Slice size used when streaming files out, and so the upper bound
    /// of per-chunk memory during a transfer.
    #[inline]
    pub fn set_max_chunk(&mut self, max_chunk: usize) {
        self.max_chunk = max_chunk.max(1);
    }

    /// Directory autosaved files land in.
    #[inline]
    pub fn set_target_dir<P: AsRef<Path>>(&mut self, directory: P) {
        self.target_dir = directory.as_ref().to_path_buf();
    }

    #[inline]
    pub fn set_compress(&mut self, compress: bool) {
        self.compress = compress;
    }

    #[inline]
    pub fn framer_mut(&mut self) -> &mut Framer<S> {
        &mut self.framer
    }

    /// Receives one message, blocking until a full frame has arrived.
    pub fn receive(&mut self) -> NetResult<Message> {
        let header = self.framer.read_header()?;
        let tag = Tag::try_from(header[0])?;

        logging::trace!(self.log, "received frame header"; "tag" => ?tag, "header_len" => header.len());

        match tag {
            Tag::SendBytes | Tag::SendText => self.unpack_bytes(header),
            Tag::SendFile => self.unpack_file(header),
            Tag::SendCompleteFile => self.unpack_complete_file(header),
            Tag::SendObject | Tag::SendList => self.unpack_object(header),
            _ => Err(Error::Protocol("unexpected session frame tag")),
        }
    }

    pub fn send_bytes(&mut self, data: &[u8]) -> NetResult<()> {
        self.send_bytes_tagged(data, Tag::SendBytes)
    }

    pub fn send_text(&mut self, text: &str) -> NetResult<()> {
        self.send_bytes_tagged(text.as_bytes(), Tag::SendText)
    }

    /// Sends a mapping as a structured payload.
    pub fn send_object(&mut self, object: &Map<String, Value>) -> NetResult<()> {
        self.send_structured(&Value::Object(object.clone()), Tag::SendObject)
    }

    /// Sends an ordered sequence as a structured payload.
    pub fn send_list(&mut self, items: &[Value]) -> NetResult<()> {
        self.send_structured(&Value::Array(items.to_vec()), Tag::SendList)
    }

    /// Sends a complete in-memory file in a single frame. Filename and
    /// content are sealed independently, each under its own nonce.
    pub fn send_complete_file(&mut self, filename: &str, data: &[u8]) -> NetResult<()> {
        let payload = if self.compress {
            self.deflate(data)?
        } else {
            data.to_vec()
        };

        let (name_cipher, name_mac, name_nonce) = self.seal(filename.as_bytes())?;
        let (file_cipher, file_mac, file_nonce) = self.seal(&payload)?;

        let mut pack = Vec::with_capacity(
            1 + COMPLETE_FILE_HEADER_SIZE as usize
                + name_nonce.len()
                + name_mac.len()
                + name_cipher.len()
                + file_nonce.len()
                + file_mac.len()
                + file_cipher.len(),
        );
        pack.write_u8(COMPLETE_FILE_HEADER_SIZE)?;
        pack.write_u8(Tag::SendCompleteFile.into())?;
        pack.write_u8(self.compress as u8)?;
        pack.write_u32::<BigEndian>(name_nonce.len() as u32)?;
        pack.write_u32::<BigEndian>(name_mac.len() as u32)?;
        pack.write_u32::<BigEndian>(name_cipher.len() as u32)?;
        pack.write_u32::<BigEndian>(file_nonce.len() as u32)?;
        pack.write_u32::<BigEndian>(file_mac.len() as u32)?;
        pack.write_u32::<BigEndian>(file_cipher.len() as u32)?;
        pack.extend_from_slice(&name_nonce);
        pack.extend_from_slice(&name_mac);
        pack.extend_from_slice(&name_cipher);
        pack.extend_from_slice(&file_nonce);
        pack.extend_from_slice(&file_mac);
        pack.extend_from_slice(&file_cipher);

        logging::debug!(self.log, "sending complete file";
                        "name" => %filename,
                        "plain_len" => data.len(),
                        "cipher_len" => file_cipher.len());

        self.framer.send(&pack)
    }

    /// Reads a file from disk and sends it as a single frame.
    pub fn send_file_from_path<P: AsRef<Path>>(&mut self, path: P) -> NetResult<()> {
        let path = path.as_ref();
        let name = base_name(path)?;
        let data = fs::read(path)?;

        self.send_complete_file(&name, &data)
    }

    /// Streams a file from disk in `max_chunk` slices: one announce frame
    /// carrying the sealed `(name, size)` pair, then one ordinary bytes
    /// frame per slice until the content is exhausted.
    pub fn send_file<P: AsRef<Path>>(&mut self, path: P) -> NetResult<()> {
        let path = path.as_ref();
        let size = fs::metadata(path)?.len();
        let name = base_name(path)?;

        self.send_file_announce(&name, size)?;

        logging::debug!(self.log, "streaming file";
                        "name" => %name,
                        "size" => size,
                        "chunk" => self.max_chunk);

        let mut file = fs::File::open(path)?;
        let mut chunk = vec![0u8; self.max_chunk];

        loop {
            let read = file.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            self.send_bytes(&chunk[..read])?;
        }

        Ok(())
    }

    fn send_file_announce(&mut self, name: &str, size: u64) -> NetResult<()> {
        let announce = FileAnnounce {
            name: name.to_string(),
            size,
        };
        let image = bincode::serialize(&announce)
            .map_err(|_| Error::Protocol("announce serialization failed"))?;

        let (cipher, mac, nonce) = self.seal(&image)?;

        let mut pack = Vec::with_capacity(
            1 + FILE_ANNOUNCE_HEADER_SIZE as usize + nonce.len() + mac.len() + cipher.len(),
        );
        pack.write_u8(FILE_ANNOUNCE_HEADER_SIZE)?;
        pack.write_u8(Tag::SendFile.into())?;
        pack.write_u32::<BigEndian>(nonce.len() as u32)?;
        pack.write_u32::<BigEndian>(mac.len() as u32)?;
        pack.write_u32::<BigEndian>(cipher.len() as u32)?;
        pack.extend_from_slice(&nonce);
        pack.extend_from_slice(&mac);
        pack.extend_from_slice(&cipher);

        self.framer.send(&pack)
    }

    fn send_bytes_tagged(&mut self, data: &[u8], tag: Tag) -> NetResult<()> {
        let payload = if self.compress {
            self.deflate(data)?
        } else {
            data.to_vec()
        };

        let (cipher, mac, nonce) = self.seal(&payload)?;

        let mut pack = Vec::with_capacity(
            1 + BYTES_HEADER_SIZE as usize + nonce.len() + mac.len() + cipher.len(),
        );
        pack.write_u8(BYTES_HEADER_SIZE)?;
        pack.write_u8(tag.into())?;
        pack.write_u8(self.compress as u8)?;
        pack.write_u32::<BigEndian>(nonce.len() as u32)?;
        pack.write_u32::<BigEndian>(mac.len() as u32)?;
        pack.write_u32::<BigEndian>(cipher.len() as u32)?;
        pack.extend_from_slice(&nonce);
        pack.extend_from_slice(&mac);
        pack.extend_from_slice(&cipher);

        self.framer.send(&pack)
    }

    fn send_structured(&mut self, value: &Value, tag: Tag) -> NetResult<()> {
        let serialized = serde_json::to_vec(value)
            .map_err(|_| Error::Protocol("structured payload serialization failed"))?;
        let serialized = if self.compress {
            self.deflate(&serialized)?
        } else {
            serialized
        };

        let (cipher, mac, nonce) = self.seal(&serialized)?;

        let envelope = SealedEnvelope {
            nonce: nonce.to_vec(),
            mac: mac.to_vec(),
            object: cipher,
        };
        let data = bincode::serialize(&envelope)
            .map_err(|_| Error::Protocol("envelope serialization failed"))?;

        let mut pack = Vec::with_capacity(1 + OBJECT_HEADER_SIZE as usize + data.len());
        pack.write_u8(OBJECT_HEADER_SIZE)?;
        pack.write_u8(tag.into())?;
        pack.write_u8(self.compress as u8)?;
        pack.write_u32::<BigEndian>(data.len() as u32)?;
        pack.extend_from_slice(&data);

        self.framer.send(&pack)
    }

    fn unpack_bytes(&mut self, header: Vec<u8>) -> NetResult<Message> {
        if header.len() != BYTES_HEADER_SIZE as usize {
            return Err(Error::Protocol("malformed bytes header"));
        }

        let mut cursor = Cursor::new(header);
        let tag = Tag::try_from(cursor.read_u8()?)?;
        let is_compressed = cursor.read_u8()? != 0;
        let nonce_len = read_segment_len(&mut cursor)?;
        let mac_len = read_segment_len(&mut cursor)?;
        let data_len = read_segment_len(&mut cursor)?;

        let nonce = self.framer.read_exact(nonce_len)?;
        let mac = self.framer.read_exact(mac_len)?;
        let data = self.framer.read_exact(data_len)?;

        let plain = self.open(&nonce, &data, &mac)?;
        let plain = if is_compressed {
            inflate(&plain)?
        } else {
            plain
        };

        match tag {
            Tag::SendText => String::from_utf8(plain)
                .map(Message::Text)
                .map_err(|_| Error::Protocol("text payload is not valid utf-8")),
            _ => Ok(Message::Bytes(plain)),
        }
    }

    fn unpack_complete_file(&mut self, header: Vec<u8>) -> NetResult<Message> {
        if header.len() != COMPLETE_FILE_HEADER_SIZE as usize {
            return Err(Error::Protocol("malformed file header"));
        }

        let mut cursor = Cursor::new(header);
        cursor.read_u8()?;
        let is_compressed = cursor.read_u8()? != 0;
        let name_nonce_len = read_segment_len(&mut cursor)?;
        let name_mac_len = read_segment_len(&mut cursor)?;
        let name_cipher_len = read_segment_len(&mut cursor)?;
        let file_nonce_len = read_segment_len(&mut cursor)?;
        let file_mac_len = read_segment_len(&mut cursor)?;
        let file_cipher_len = read_segment_len(&mut cursor)?;

        let name_nonce = self.framer.read_exact(name_nonce_len)?;
        let name_mac = self.framer.read_exact(name_mac_len)?;
        let name_cipher = self.framer.read_exact(name_cipher_len)?;
        let file_nonce = self.framer.read_exact(file_nonce_len)?;
        let file_mac = self.framer.read_exact(file_mac_len)?;
        let file_cipher = self.framer.read_exact(file_cipher_len)?;

        let name = self.open(&name_nonce, &name_cipher, &name_mac)?;
        let data = self.open(&file_nonce, &file_cipher, &file_mac)?;
        let data = if is_compressed { inflate(&data)? } else { data };

        let name = String::from_utf8(name)
            .map_err(|_| Error::Protocol("file name is not valid utf-8"))?;

        Ok(Message::File(FileData {
            name,
            size: data.len() as u64,
            data,
        }))
    }

    fn unpack_file(&mut self, header: Vec<u8>) -> NetResult<Message> {
        if header.len() != FILE_ANNOUNCE_HEADER_SIZE as usize {
            return Err(Error::Protocol("malformed file announce header"));
        }

        let mut cursor = Cursor::new(header);
        cursor.read_u8()?;
        let nonce_len = read_segment_len(&mut cursor)?;
        let mac_len = read_segment_len(&mut cursor)?;
        let cipher_len = read_segment_len(&mut cursor)?;

        let nonce = self.framer.read_exact(nonce_len)?;
        let mac = self.framer.read_exact(mac_len)?;
        let cipher = self.framer.read_exact(cipher_len)?;

        let image = self.open(&nonce, &cipher, &mac)?;
        let announce: FileAnnounce = bincode::deserialize(&image)
            .map_err(|_| Error::Protocol("malformed file announce"))?;

        logging::debug!(self.log, "incoming file stream";
                        "name" => %announce.name,
                        "size" => announce.size,
                        "autosave" => self.autosave);

        if self.autosave {
            self.stream_to_disk(announce)
        } else {
            self.stream_to_memory(announce)
        }
    }

    /// Next chunk of an in-flight file stream. Chunks travel as ordinary
    /// bytes frames.
    fn next_chunk(&mut self) -> NetResult<Vec<u8>> {
        match self.receive()? {
            Message::Bytes(data) => {
                if data.is_empty() {
                    return Err(Error::Protocol("empty file chunk"));
                }
                Ok(data)
            }
            _ => Err(Error::Protocol("unexpected frame inside file stream")),
        }
    }

    fn stream_to_disk(&mut self, announce: FileAnnounce) -> NetResult<Message> {
        let name = strip_to_base_name(&announce.name)?;
        let path = self.target_dir.join(&name);

        let mut file = fs::File::create(&path)?;
        let mut received: u64 = 0;

        while received < announce.size {
            let chunk = self.next_chunk()?;
            received += chunk.len() as u64;
            file.write_all(&chunk)?;
        }

        Ok(Message::SavedFile(FileRef {
            name,
            size: announce.size,
        }))
    }

    fn stream_to_memory(&mut self, announce: FileAnnounce) -> NetResult<Message> {
        let mut data = Vec::new();
        let mut received: u64 = 0;

        while received < announce.size {
            let chunk = self.next_chunk()?;
            received += chunk.len() as u64;
            data.extend_from_slice(&chunk);
        }

        Ok(Message::File(FileData {
            name: announce.name,
            size: announce.size,
            data,
        }))
    }

    fn unpack_object(&mut self, header: Vec<u8>) -> NetResult<Message> {
        if header.len() != OBJECT_HEADER_SIZE as usize {
            return Err(Error::Protocol("malformed object header"));
        }

        let mut cursor = Cursor::new(header);
        let tag = Tag::try_from(cursor.read_u8()?)?;
        let is_compressed = cursor.read_u8()? != 0;
        let data_len = read_segment_len(&mut cursor)?;

        let data = self.framer.read_exact(data_len)?;
        let envelope: SealedEnvelope = bincode::deserialize(&data)
            .map_err(|_| Error::Protocol("malformed sealed envelope"))?;

        let plain = self.open(&envelope.nonce, &envelope.object, &envelope.mac)?;
        let plain = if is_compressed {
            inflate(&plain)?
        } else {
            plain
        };

        let value: Value = serde_json::from_slice(&plain)
            .map_err(|_| Error::Protocol("malformed structured payload"))?;

        match (tag, value) {
            (Tag::SendObject, Value::Object(map)) => Ok(Message::Object(map)),
            (Tag::SendList, Value::Array(items)) => Ok(Message::List(items)),
            _ => Err(Error::Protocol("structured payload does not match its tag")),
        }
    }

    fn seal(
        &self,
        plain: &[u8],
    ) -> NetResult<(Vec<u8>, [u8; crypto::MAC_SIZE], [u8; crypto::NONCE_SIZE])> {
        crypto::seal(&self.key, plain).map_err(|_| Error::Protocol("sealing failed"))
    }

    fn open(&self, nonce: &[u8], data: &[u8], mac: &[u8]) -> NetResult<Vec<u8>> {
        crypto::open(&self.key, nonce, data, mac).map_err(Error::from)
    }

    fn deflate(&self, data: &[u8]) -> NetResult<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder.finish().map_err(Into::into)
    }
}

fn inflate(data: &[u8]) -> NetResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut plain = Vec::new();

    decoder
        .read_to_end(&mut plain)
        .map_err(|_| Error::Protocol("corrupt compressed payload"))?;

    Ok(plain)
}

/// Final path component as a string; transfers carry plain file names,
/// never paths.
fn base_name(path: &Path) -> NetResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file name is not representable",
            ))
        })
}

/// Same, applied to a peer-supplied name before it touches the disk.
fn strip_to_base_name(name: &str) -> NetResult<String> {
    Path::new(name)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or(Error::Protocol("unusable file name in announce"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::MockStream;
    use serde_json::json;

    const KEY: [u8; 16] = [77; 16];

    fn make_session(compress: bool) -> Session<MockStream> {
        Session::new(
            Framer::new(MockStream::new()),
            SessionKey::new(KEY),
            compress,
            None,
        )
    }

    /// Everything the sender wrote becomes the receivable side of a new
    /// session, the mock-stream analogue of swapping channel buffers.
    fn turn_around(sender: &mut Session<MockStream>) -> Session<MockStream> {
        let stream =
            std::mem::replace(sender.framer_mut().stream_mut(), MockStream::new()).loopback();

        Session::new(Framer::new(stream), SessionKey::new(KEY), false, None)
    }

    fn assert_fully_consumed(receiver: &mut Session<MockStream>) {
        let stream = receiver.framer_mut().stream_mut();
        assert_eq!(
            stream.incoming.position() as usize,
            stream.incoming.get_ref().len(),
            "declared lengths must account for every byte on the stream"
        );
    }

    #[test]
    fn test_bytes_roundtrip() {
        for &compress in &[false, true] {
            let mut sender = make_session(compress);
            sender.send_bytes(b"raw payload").unwrap();

            let mut receiver = turn_around(&mut sender);

            assert_eq!(
                receiver.receive().unwrap(),
                Message::Bytes(b"raw payload".to_vec())
            );
            assert_fully_consumed(&mut receiver);
        }
    }

    #[test]
    fn test_text_roundtrip() {
        for &compress in &[false, true] {
            let mut sender = make_session(compress);
            sender.send_text("hello, \u{4e16}\u{754c}").unwrap();

            let mut receiver = turn_around(&mut sender);

            assert_eq!(
                receiver.receive().unwrap(),
                Message::Text("hello, \u{4e16}\u{754c}".to_string())
            );
        }
    }

    #[test]
    fn test_empty_bytes_roundtrip() {
        let mut sender = make_session(false);
        sender.send_bytes(b"").unwrap();

        let mut receiver = turn_around(&mut sender);

        assert_eq!(receiver.receive().unwrap(), Message::Bytes(Vec::new()));
    }

    #[test]
    fn test_complete_file_roundtrip() {
        for &compress in &[false, true] {
            let content: Vec<u8> = (0..4096u32).map(|value| value as u8).collect();

            let mut sender = make_session(compress);
            sender.send_complete_file("blob.bin", &content).unwrap();

            let mut receiver = turn_around(&mut sender);

            match receiver.receive().unwrap() {
                Message::File(file) => {
                    assert_eq!(file.name, "blob.bin");
                    assert_eq!(file.size, content.len() as u64);
                    assert_eq!(file.data, content);
                }
                other => panic!("Unexpected message {:?}", other),
            }
            assert_fully_consumed(&mut receiver);
        }
    }

    #[test]
    fn test_object_roundtrip() {
        for &compress in &[false, true] {
            let mut object = Map::new();
            object.insert("k".to_string(), json!(42));
            object.insert("nested".to_string(), json!({"deep": [1, 2, 3]}));

            let mut sender = make_session(compress);
            sender.send_object(&object).unwrap();

            let mut receiver = turn_around(&mut sender);

            assert_eq!(receiver.receive().unwrap(), Message::Object(object));
        }
    }

    #[test]
    fn test_list_roundtrip() {
        let items = vec![json!(1), json!("two"), json!({"three": 3})];

        let mut sender = make_session(false);
        sender.send_list(&items).unwrap();

        let mut receiver = turn_around(&mut sender);

        assert_eq!(receiver.receive().unwrap(), Message::List(items));
    }

    #[test]
    fn test_chunked_file_in_memory() {
        let content: Vec<u8> = (0..10_000u32).map(|value| (value % 251) as u8).collect();

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("stream.bin");
        fs::write(&source, &content).unwrap();

        let mut sender = make_session(false);
        sender.set_max_chunk(512);
        sender.send_file(&source).unwrap();

        let mut receiver = turn_around(&mut sender);

        match receiver.receive().unwrap() {
            Message::File(file) => {
                assert_eq!(file.name, "stream.bin");
                assert_eq!(file.size, content.len() as u64);
                assert_eq!(file.data, content);
            }
            other => panic!("Unexpected message {:?}", other),
        }
        assert_fully_consumed(&mut receiver);
    }

    #[test]
    fn test_chunked_file_compressed() {
        // Compressed chunks still account against the uncompressed total.
        let content = vec![7u8; 8192];

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("zeros.bin");
        fs::write(&source, &content).unwrap();

        let mut sender = make_session(true);
        sender.set_max_chunk(1024);
        sender.send_file(&source).unwrap();

        let mut receiver = turn_around(&mut sender);

        match receiver.receive().unwrap() {
            Message::File(file) => assert_eq!(file.data, content),
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_chunked_file_autosave() {
        let content: Vec<u8> = (0..5000u32).map(|value| (value % 13) as u8).collect();

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("saved.bin");
        fs::write(&source, &content).unwrap();

        let target = tempfile::tempdir().unwrap();

        let mut sender = make_session(false);
        sender.set_max_chunk(700);
        sender.send_file(&source).unwrap();

        let mut receiver = turn_around(&mut sender);
        receiver.set_autosave(true);
        receiver.set_target_dir(target.path());

        assert_eq!(
            receiver.receive().unwrap(),
            Message::SavedFile(FileRef {
                name: "saved.bin".to_string(),
                size: content.len() as u64,
            })
        );
        assert_eq!(fs::read(target.path().join("saved.bin")).unwrap(), content);
    }

    #[test]
    fn test_autosave_strips_directories_from_name() {
        let content = vec![1u8, 2, 3];
        let target = tempfile::tempdir().unwrap();

        let mut sender = make_session(false);
        sender.send_file_announce("../escape.bin", content.len() as u64).unwrap();
        sender.send_bytes(&content).unwrap();

        let mut receiver = turn_around(&mut sender);
        receiver.set_autosave(true);
        receiver.set_target_dir(target.path());

        assert_eq!(
            receiver.receive().unwrap(),
            Message::SavedFile(FileRef {
                name: "escape.bin".to_string(),
                size: 3,
            })
        );
        assert_eq!(fs::read(target.path().join("escape.bin")).unwrap(), content);
    }

    #[test]
    fn test_tampered_cipher_fails_verification() {
        let mut sender = make_session(false);
        sender.send_bytes(b"sensitive").unwrap();

        // Flip one bit inside the ciphertext segment (the frame tail).
        let outgoing = &mut sender.framer_mut().stream_mut().outgoing;
        let last = outgoing.len() - 1;
        outgoing[last] ^= 1;

        let mut receiver = turn_around(&mut sender);

        assert_eq!(receiver.receive().unwrap_err(), Error::VerificationFailed);
    }

    #[test]
    fn test_fresh_nonce_yields_distinct_frames() {
        let mut sender = make_session(false);

        sender.send_bytes(b"identical").unwrap();
        let first = sender.framer_mut().stream_mut().outgoing.clone();
        sender.framer_mut().stream_mut().outgoing.clear();

        sender.send_bytes(b"identical").unwrap();
        let second = sender.framer_mut().stream_mut().outgoing.clone();

        assert_eq!(first.len(), second.len());
        assert_ne!(first, second);
    }

    #[test]
    fn test_unknown_tag() {
        let mut receiver = Session::new(
            Framer::new(MockStream::with_incoming(vec![1, 200])),
            SessionKey::new(KEY),
            false,
            None,
        );

        assert_eq!(
            receiver.receive().unwrap_err(),
            Error::Protocol("unknown message tag")
        );
    }

    #[test]
    fn test_handshake_tag_in_session_is_rejected() {
        let mut receiver = Session::new(
            Framer::new(MockStream::with_incoming(vec![1, Tag::SendSessionKey.into()])),
            SessionKey::new(KEY),
            false,
            None,
        );

        assert_eq!(
            receiver.receive().unwrap_err(),
            Error::Protocol("unexpected session frame tag")
        );
    }

    #[test]
    fn test_oversized_declared_length() {
        let mut header = vec![BYTES_HEADER_SIZE, Tag::SendBytes.into(), 0];
        header.write_u32::<BigEndian>(0xffff_ffff).unwrap();
        header.write_u32::<BigEndian>(16).unwrap();
        header.write_u32::<BigEndian>(16).unwrap();

        let mut receiver = Session::new(
            Framer::new(MockStream::with_incoming(header)),
            SessionKey::new(KEY),
            false,
            None,
        );

        assert_eq!(
            receiver.receive().unwrap_err(),
            Error::Protocol("declared length exceeds bounds")
        );
    }

    #[test]
    fn test_truncated_stream_is_connection_lost() {
        let mut sender = make_session(false);
        sender.send_bytes(b"cut short").unwrap();

        let mut wire = std::mem::replace(sender.framer_mut().stream_mut(), MockStream::new())
            .outgoing;
        wire.truncate(wire.len() - 3);

        let mut receiver = Session::new(
            Framer::new(MockStream::with_incoming(wire)),
            SessionKey::new(KEY),
            false,
            None,
        );

        assert_eq!(receiver.receive().unwrap_err(), Error::ConnectionLost);
    }

    #[test]
    fn test_wrong_session_key_fails_verification() {
        let mut sender = make_session(false);
        sender.send_bytes(b"for someone else").unwrap();

        let stream =
            std::mem::replace(sender.framer_mut().stream_mut(), MockStream::new()).loopback();
        let mut receiver = Session::new(
            Framer::new(stream),
            SessionKey::new([78; 16]),
            false,
            None,
        );

        assert_eq!(receiver.receive().unwrap_err(), Error::VerificationFailed);
    }
}
