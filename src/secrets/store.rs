use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Result, SupervisorError};
use crate::secrets::ValueRef;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Encrypted at-rest key/value store.
///
/// The on-disk ciphertext is `base64(nonce || tag || body)`; the plaintext
/// is a JSON object of UTF-8 strings. The 256-bit key lives base64-encoded
/// in a sibling file. Both files are owner-only (0600).
///
/// Reads go through an instance-lifetime cache; absent keys are never
/// cached. Writes re-encrypt the whole document and replace the file
/// atomically, so a failed write leaves the previous ciphertext intact.
pub struct SecretsStore {
    secrets_file: PathBuf,
    key_file: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl SecretsStore {
    pub fn new(secrets_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            secrets_file: secrets_file.into(),
            key_file: key_file.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn secrets_file(&self) -> &Path {
        &self.secrets_file
    }

    /// Current value for `key`, or `None` if absent.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.cache.lock().unwrap().get(key) {
            return Ok(Some(value.clone()));
        }

        let document = self.load_document()?;
        match document.get(key) {
            Some(value) => {
                self.cache
                    .lock()
                    .unwrap()
                    .insert(key.to_string(), value.clone());
                Ok(Some(value.clone()))
            }
            None => Ok(None),
        }
    }

    /// Merge `key = value` into the document and rewrite it.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut document = self.load_document()?;
        document.insert(key.to_string(), value.to_string());
        self.write_document(&document)?;
        self.cache
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut document = self.load_document()?;
        let removed = document.remove(key).is_some();
        if removed {
            self.write_document(&document)?;
        }
        self.cache.lock().unwrap().remove(key);
        Ok(removed)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.load_document()?.into_keys().collect();
        keys.sort();
        Ok(keys)
    }

    /// Import every process environment variable whose name starts with
    /// `prefix`, storing the remainder of the name. Returns the count.
    pub fn import_from_env(&self, prefix: &str) -> Result<usize> {
        let mut document = self.load_document()?;
        let mut imported = 0;
        for (name, value) in std::env::vars() {
            if let Some(key) = name.strip_prefix(prefix) {
                if key.is_empty() {
                    continue;
                }
                document.insert(key.to_string(), value.clone());
                self.cache.lock().unwrap().insert(key.to_string(), value);
                imported += 1;
            }
        }
        if imported > 0 {
            self.write_document(&document)?;
        }
        Ok(imported)
    }

    /// Copy the ciphertext to `dst`. Returns whether anything was written.
    pub fn backup(&self, dst: &Path) -> Result<bool> {
        if !self.secrets_file.exists() {
            return Ok(false);
        }
        fs::copy(&self.secrets_file, dst).map_err(|e| {
            SupervisorError::Configuration(format!(
                "Failed to back up secrets to {}: {e}",
                dst.display()
            ))
        })?;
        Ok(true)
    }

    /// Resolve an ordered environment mapping of value expressions.
    pub fn resolve(&self, environment: &[(String, String)]) -> Result<Vec<(String, String)>> {
        environment
            .iter()
            .map(|(name, raw)| Ok((name.clone(), ValueRef::parse(raw).resolve(self)?)))
            .collect()
    }

    fn load_document(&self) -> Result<HashMap<String, String>> {
        if !self.secrets_file.exists() {
            return Ok(HashMap::new());
        }

        let encoded = fs::read_to_string(&self.secrets_file)
            .map_err(|e| SupervisorError::Security(format!("Failed to load secrets: {e}")))?;
        let blob = BASE64
            .decode(encoded.trim())
            .map_err(|e| SupervisorError::Security(format!("Failed to load secrets: {e}")))?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(SupervisorError::Security(
                "Failed to load secrets: ciphertext too short".to_string(),
            ));
        }

        let (nonce, rest) = blob.split_at(NONCE_LEN);
        let (tag, body) = rest.split_at(TAG_LEN);

        // aes-gcm expects body || tag
        let mut sealed = Vec::with_capacity(body.len() + TAG_LEN);
        sealed.extend_from_slice(body);
        sealed.extend_from_slice(tag);

        let cipher = Aes256Gcm::new(&self.load_or_create_key()?);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed.as_ref())
            .map_err(|_| {
                SupervisorError::Security(
                    "Failed to load secrets: decryption failed (wrong key or corrupted data)"
                        .to_string(),
                )
            })?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| SupervisorError::Security(format!("Failed to load secrets: {e}")))
    }

    fn write_document(&self, document: &HashMap<String, String>) -> Result<()> {
        let plaintext = serde_json::to_vec(document)
            .map_err(|e| SupervisorError::Configuration(format!("Failed to encode secrets: {e}")))?;

        let cipher = Aes256Gcm::new(&self.load_or_create_key()?);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher.encrypt(&nonce, plaintext.as_ref()).map_err(|_| {
            SupervisorError::Configuration("Failed to encrypt secrets".to_string())
        })?;

        // sealed is body || tag; the file layout is nonce || tag || body
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut blob = Vec::with_capacity(NONCE_LEN + TAG_LEN + body.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(tag);
        blob.extend_from_slice(body);

        write_private_atomic(&self.secrets_file, BASE64.encode(&blob).as_bytes())
    }

    fn load_or_create_key(&self) -> Result<Key<Aes256Gcm>> {
        if self.key_file.exists() {
            let encoded = fs::read_to_string(&self.key_file)
                .map_err(|e| SupervisorError::Security(format!("Failed to load secrets: {e}")))?;
            let bytes = BASE64
                .decode(encoded.trim())
                .map_err(|e| SupervisorError::Security(format!("Failed to load secrets: {e}")))?;
            if bytes.len() != KEY_LEN {
                return Err(SupervisorError::Security(
                    "Failed to load secrets: key file is not a 256-bit key".to_string(),
                ));
            }
            return Ok(*Key::<Aes256Gcm>::from_slice(&bytes));
        }

        let key = Aes256Gcm::generate_key(OsRng);
        write_private_atomic(&self.key_file, BASE64.encode(key).as_bytes())?;
        tracing::info!(key_file = %self.key_file.display(), "Generated new secrets key");
        Ok(key)
    }
}

/// Write via a sibling temp file, 0600, then rename over the target.
fn write_private_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir).map_err(|e| {
            SupervisorError::Configuration(format!("Failed to create {}: {e}", dir.display()))
        })?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(parent.unwrap_or(Path::new(".")))
        .map_err(|e| SupervisorError::Configuration(format!("Failed to write secrets: {e}")))?;
    tmp.write_all(contents)
        .map_err(|e| SupervisorError::Configuration(format!("Failed to write secrets: {e}")))?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(|e| SupervisorError::Configuration(format!("Failed to write secrets: {e}")))?;
    tmp.persist(path)
        .map_err(|e| SupervisorError::Configuration(format!("Failed to write secrets: {e}")))?;
    Ok(())
}

/// Mask a secret for display: values of 8 chars or fewer are fully masked,
/// longer ones keep the first and last three characters.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 6))
}
