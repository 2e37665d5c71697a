use crate::net::certificate::Validity;
use crate::net::support::{Error, NetResult};
use ferrite::crypto;
use ferrite::time::timestamp_millis;
use hashbrown::HashMap;
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One enrolled client. Only the password hash is ever stored; the
/// record is refreshed on every successful issuance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClientRecord {
    pub id: String,
    pub password_hash: [u8; 32],
    pub is_active: bool,
    pub recent_public_key: Option<Vec<u8>>,
    pub validity: Option<Validity>,
    pub access_time: i64,
}

impl ClientRecord {
    pub fn new(id: &str, password: &str, key: Option<Vec<u8>>) -> ClientRecord {
        ClientRecord {
            id: id.to_string(),
            password_hash: crypto::sha256(password.as_bytes()),
            is_active: true,
            recent_public_key: key,
            validity: None,
            access_time: timestamp_millis(),
        }
    }

    #[inline]
    pub fn compare_password(&self, password: &str) -> bool {
        crypto::sha256(password.as_bytes()) == self.password_hash
    }

    #[inline]
    pub fn update_access_time(&mut self) {
        self.access_time = timestamp_millis();
    }
}

/// In-memory table of enrolled clients keyed by id, with snapshot
/// persistence. Shared across issuing workers behind a single mutex.
pub struct Database {
    clients: HashMap<String, ClientRecord>,
    current_file: Option<PathBuf>,
}

impl Database {
    pub fn new() -> Database {
        Database {
            clients: HashMap::new(),
            current_file: None,
        }
    }

    #[inline]
    pub fn exist(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    #[inline]
    pub fn get(&self, client_id: &str) -> Option<&ClientRecord> {
        self.clients.get(client_id)
    }

    #[inline]
    pub fn get_mut(&mut self, client_id: &str) -> Option<&mut ClientRecord> {
        self.clients.get_mut(client_id)
    }

    /// Adds a record unless the id is already enrolled.
    pub fn add(&mut self, client: ClientRecord) {
        self.clients.entry(client.id.clone()).or_insert(client);
    }

    /// Removes and returns the record with the given id.
    pub fn remove(&mut self, client_id: &str) -> Option<ClientRecord> {
        self.clients.remove(client_id)
    }

    /// True iff the id is enrolled and the password hashes to the stored
    /// digest.
    pub fn verify(&self, client_id: &str, password: &str) -> bool {
        match self.get(client_id) {
            Some(client) => client.compare_password(password),
            None => false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }

    /// Writes a snapshot of every record. Without an explicit path the
    /// one captured by `load` (or a previous save) is reused.
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: Option<P>) -> NetResult<()> {
        let path = match path {
            Some(path) => {
                let path = path.as_ref().to_path_buf();
                self.current_file = Some(path.clone());
                path
            }
            None => self.current_file.clone().ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "no snapshot path specified",
                ))
            })?,
        };

        let records: Vec<&ClientRecord> = self.clients.values().collect();
        let image = bincode::serialize(&records)
            .map_err(|_| Error::Protocol("snapshot serialization failed"))?;

        fs::write(path, image)?;
        Ok(())
    }

    /// Loads a snapshot, merging its records into the table, and captures
    /// the path for later saves.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> NetResult<()> {
        let image = fs::read(path.as_ref())?;
        let records: Vec<ClientRecord> =
            bincode::deserialize(&image).map_err(|_| Error::Protocol("malformed snapshot"))?;

        for record in records {
            self.add(record);
        }

        self.current_file = Some(path.as_ref().to_path_buf());
        Ok(())
    }
}
