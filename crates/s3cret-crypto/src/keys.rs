//! Session key generation

use rand::rngs::OsRng;
use rand::RngCore;
use s3cret_core::CopyError;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::{KEY_SIZE, SESSION_ID_SIZE};

/// A per-copy 256-bit encryption key plus its opaque session id.
///
/// Never persisted. Zeroized on drop.
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
    id: Uuid,
}

impl SessionKey {
    pub fn from_parts(bytes: [u8; KEY_SIZE], id: Uuid) -> Self {
        Self { bytes, id }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .field("id", &self.id)
            .finish()
    }
}

/// Generate a fresh session key from the OS CSPRNG.
///
/// There is no fallback source: if the OS cannot supply entropy the copy
/// must not start.
pub fn new_session_key() -> Result<SessionKey, CopyError> {
    // Filled in place so a failed second read still zeroizes the secret on drop.
    let mut key = SessionKey::from_parts([0u8; KEY_SIZE], Uuid::nil());
    let mut id = [0u8; SESSION_ID_SIZE];

    OsRng
        .try_fill_bytes(&mut key.bytes)
        .and_then(|_| OsRng.try_fill_bytes(&mut id))
        .map_err(|e| CopyError::EntropyUnavailable(e.to_string()))?;

    key.id = uuid::Builder::from_random_bytes(id).into_uuid();
    tracing::debug!(session_id = %key.id, "generated session key");

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_generation() {
        let k1 = new_session_key().unwrap();
        let k2 = new_session_key().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
        assert_ne!(k1.id(), k2.id(), "session ids must differ");
    }

    #[test]
    fn test_session_id_is_v4_uuid() {
        let key = new_session_key().unwrap();
        assert_eq!(key.id().get_version_num(), 4);
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = SessionKey::from_parts([7u8; KEY_SIZE], Uuid::nil());
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("7, 7"));
    }
}
