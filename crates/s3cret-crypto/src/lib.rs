//! s3cret-crypto: client-side encryption for s3cret uploads
//!
//! Architecture: Chunk-then-Encrypt with XChaCha20-Poly1305
//!
//! Pipeline: plaintext → fixed-size chunk → seal (random 192-bit nonce) → wire record → part
//!
//! Key lifecycle:
//! ```text
//! SessionKey (256-bit random + 128-bit session id, one per copy, zeroized on drop)
//!   └── Record AEAD: XChaCha20-Poly1305 (key=session key, nonce=random_192bit, no AAD)
//! ```

pub mod keys;
pub mod record;

pub use keys::{new_session_key, SessionKey};
pub use record::{
    decrypt_object, open_record, seal_chunk, stored_len, EncryptedRecord, RecordError,
    RecordReader,
};

/// Size of a session key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the opaque session identifier (128-bit)
pub const SESSION_ID_SIZE: usize = 16;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
