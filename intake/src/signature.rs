use md5::Md5;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Hashed in place of the exception text when a report carries none.
pub const NO_EXCEPTION: &str = "noException";

/// Maps exception text to the stable key bugs are deduplicated on.
pub trait SignatureHasher: Send + Sync {
    fn hash(&self, input: &str) -> String;

    fn signature(&self, exception: Option<&str>) -> String {
        self.hash(exception.unwrap_or(NO_EXCEPTION))
    }
}

impl<F> SignatureHasher for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn hash(&self, input: &str) -> String {
        self(input)
    }
}

/// Lowercase hex MD5, compatible with signatures already stored by earlier deployments.
pub struct Md5Hasher;

impl SignatureHasher for Md5Hasher {
    fn hash(&self, input: &str) -> String {
        hex::encode(Md5::digest(input.as_bytes()))
    }
}

pub struct Sha256Hasher;

impl SignatureHasher for Sha256Hasher {
    fn hash(&self, input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()))
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub fn hasher(self) -> Arc<dyn SignatureHasher> {
        match self {
            HashAlgorithm::Md5 => Arc::new(Md5Hasher),
            HashAlgorithm::Sha256 => Arc::new(Sha256Hasher),
        }
    }
}
