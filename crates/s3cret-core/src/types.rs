use std::fmt;
use std::str::FromStr;

use crate::error::CopyError;

/// One fixed-size slice of the source file.
///
/// `payload` holds exactly the logical bytes read; only the final chunk may
/// be shorter than the configured chunk size, and it is flagged as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextChunk {
    pub index: u64,
    pub payload: Vec<u8>,
    pub is_final: bool,
}

impl PlaintextChunk {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Bucket/key pair parsed from an `s3://bucket/key` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocator {
    pub bucket: String,
    pub key: String,
}

const SCHEME: &str = "s3://";

impl FromStr for StorageLocator {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| CopyError::InvalidLocator {
            locator: s.to_string(),
            reason,
        };

        let rest = match s.get(..SCHEME.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(SCHEME) => &s[SCHEME.len()..],
            _ => return Err(invalid("must begin with 's3://'")),
        };

        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| invalid("must include slash ('/') after bucket name"))?;

        if bucket.is_empty() {
            return Err(invalid("bucket name is empty"));
        }
        if key.is_empty() {
            return Err(invalid("must include an object key"));
        }

        Ok(StorageLocator {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.bucket, self.key)
    }
}
