//! Credential storage collaborator interface
//!
//! The client only calls this interface; secure persistence (flash,
//! secure element) lives outside the crate. [`MemoryStore`] is the
//! reference implementation used by tests and the demo; [`FileStore`]
//! persists to a JSON file for hosted targets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::error::{Lwm2mError, Result};

/// Keys the client reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    /// Server-assigned account identifier
    AccountId,
    /// Server-assigned endpoint name returned by registration
    InternalEndpointName,
    /// Bootstrap server URI
    BootstrapUri,
    /// Registration (LWM2M) server URI
    ServerUri,
    /// Device certificate or PSK identity
    DeviceCertificate,
    /// Device private key or PSK secret
    DeviceKey,
    /// Server root certificate
    ServerCertificate,
}

impl CredentialKey {
    /// Stable storage key string
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccountId => "account_id",
            Self::InternalEndpointName => "internal_endpoint",
            Self::BootstrapUri => "bootstrap_uri",
            Self::ServerUri => "server_uri",
            Self::DeviceCertificate => "device_cert",
            Self::DeviceKey => "device_key",
            Self::ServerCertificate => "server_cert",
        }
    }
}

/// Storage collaborator: `get/set/delete` over opaque byte values
pub trait CredentialStore {
    /// Read a value; Ok(None) when the key is absent
    fn get(&self, key: CredentialKey) -> Result<Option<Vec<u8>>>;
    /// Write a value
    fn set(&mut self, key: CredentialKey, value: &[u8]) -> Result<()>;
    /// Delete a value; deleting an absent key is not an error
    fn delete(&mut self, key: CredentialKey) -> Result<()>;

    /// Whether a usable registration credential set exists
    fn has_registration_credentials(&self) -> bool {
        matches!(self.get(CredentialKey::ServerUri), Ok(Some(v)) if !v.is_empty())
            && matches!(self.get(CredentialKey::DeviceKey), Ok(Some(v)) if !v.is_empty())
    }

    /// Whether a usable bootstrap credential set exists
    fn has_bootstrap_credentials(&self) -> bool {
        matches!(self.get(CredentialKey::BootstrapUri), Ok(Some(v)) if !v.is_empty())
    }

    /// Wipe registration credentials ahead of a re-bootstrap
    fn wipe_registration_credentials(&mut self) -> Result<()> {
        self.delete(CredentialKey::ServerUri)?;
        self.delete(CredentialKey::DeviceCertificate)?;
        self.delete(CredentialKey::DeviceKey)?;
        self.delete(CredentialKey::InternalEndpointName)
    }
}

/// In-memory credential store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<CredentialKey, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with registration credentials already provisioned
    pub fn provisioned(server_uri: &str, device_key: &[u8]) -> Self {
        let mut store = Self::new();
        store.values.insert(CredentialKey::ServerUri, server_uri.as_bytes().to_vec());
        store.values.insert(CredentialKey::DeviceKey, device_key.to_vec());
        store
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: CredentialKey) -> Result<Option<Vec<u8>>> {
        Ok(self.values.get(&key).cloned())
    }

    fn set(&mut self, key: CredentialKey, value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return Err(Lwm2mError::Credential(format!(
                "refusing to store empty {}",
                key.as_str()
            )));
        }
        self.values.insert(key, value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: CredentialKey) -> Result<()> {
        self.values.remove(&key);
        Ok(())
    }
}

/// On-disk credential file layout: key name to base64 value
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    credentials: HashMap<String, String>,
}

/// Credential store persisted as a JSON file, for hosted targets.
/// Every mutation rewrites the file so a crash never loses more than
/// the in-flight change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: CredentialFile,
}

impl FileStore {
    /// Open an existing credential file, or start empty when the file
    /// does not exist yet
    pub fn open(path: &Path) -> Result<Self> {
        let file = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| Lwm2mError::Decode(format!("credential file: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CredentialFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn flush(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.file)
            .map_err(|e| Lwm2mError::Encode(format!("credential file: {}", e)))?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: CredentialKey) -> Result<Option<Vec<u8>>> {
        match self.file.credentials.get(key.as_str()) {
            None => Ok(None),
            Some(encoded) => BASE64
                .decode(encoded)
                .map(Some)
                .map_err(|_| Lwm2mError::Credential(format!("corrupt stored {}", key.as_str()))),
        }
    }

    fn set(&mut self, key: CredentialKey, value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return Err(Lwm2mError::Credential(format!(
                "refusing to store empty {}",
                key.as_str()
            )));
        }
        self.file
            .credentials
            .insert(key.as_str().to_string(), BASE64.encode(value));
        self.flush()
    }

    fn delete(&mut self, key: CredentialKey) -> Result<()> {
        if self.file.credentials.remove(key.as_str()).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}
