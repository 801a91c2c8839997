//! Code generation and one-way digests.
//!
//! Codes are drawn from an [`EntropySource`] by rejection sampling so each
//! symbol is uniform over the alphabet. Only the HMAC-SHA256 digest of a code
//! is ever persisted; the raw code leaves this module once, for delivery.

use crate::config::CodeKind;
use crate::errors::OtpError;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const DIGITS: &[u8] = b"0123456789";
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Upper bound on refills before giving up on a degenerate source.
const MAX_FILL_ROUNDS: usize = 16;

pub trait EntropySource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<(), OtpError>;
}

/// Operating system CSPRNG.
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), OtpError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| OtpError::Generation(format!("entropy source failed: {}", e)))
    }
}

#[derive(Clone)]
pub struct CodeGenerator {
    length: usize,
    kind: CodeKind,
    entropy: Arc<dyn EntropySource>,
}

impl CodeGenerator {
    pub fn new(length: usize, kind: CodeKind) -> Self {
        Self {
            length,
            kind,
            entropy: Arc::new(OsEntropy),
        }
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    fn alphabet(&self) -> &'static [u8] {
        match self.kind {
            CodeKind::Numeric => DIGITS,
            CodeKind::Alphanumeric => ALPHANUMERIC,
        }
    }

    pub fn generate(&self) -> Result<String, OtpError> {
        let alphabet = self.alphabet();
        let n = alphabet.len();
        // Bytes at or above this bound would bias the modulo.
        let zone = 256 - (256 % n);

        let mut code = String::with_capacity(self.length);
        let mut buf = [0u8; 32];
        for _ in 0..MAX_FILL_ROUNDS {
            self.entropy.fill(&mut buf)?;
            for &b in buf.iter().filter(|&&b| (b as usize) < zone) {
                code.push(alphabet[b as usize % n] as char);
                if code.len() == self.length {
                    return Ok(code);
                }
            }
        }
        Err(OtpError::Generation(
            "entropy source produced no usable bytes".to_string(),
        ))
    }

    /// Canonical form of a submitted code, matching what [`generate`](Self::generate) emits.
    pub fn canonicalize(&self, code: &str) -> String {
        let trimmed = code.trim();
        match self.kind {
            CodeKind::Numeric => trimmed.to_string(),
            CodeKind::Alphanumeric => trimmed.to_ascii_uppercase(),
        }
    }
}

/// Hex-encoded HMAC-SHA256 of `code` keyed with `secret`.
pub fn hash_code(code: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(code.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Recomputes the digest of `code` and compares it to `digest` in constant time.
pub fn verify_code(code: &str, digest: &str, secret: &str) -> bool {
    let expected = hash_code(code, secret);
    expected.as_bytes().ct_eq(digest.as_bytes()).into()
}
