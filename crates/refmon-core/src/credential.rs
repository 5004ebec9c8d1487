use crate::error::{MonitorError, MonitorResult};
use crate::identity::Principal;
use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

pub const DIGEST_LEN: usize = 32;

/// SHA-256 of the administrator secret. The plaintext is never retained.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct PasswordDigest([u8; DIGEST_LEN]);

impl PasswordDigest {
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Accept a digest computed elsewhere (hex, as `sha256sum` prints it).
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| anyhow!("digest hex: {e}"))?;
        let arr: [u8; DIGEST_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("digest must be {DIGEST_LEN} bytes, got {}", bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordDigest(<redacted>)")
    }
}

/// Hash `supplied_secret` and compare it with `stored` in constant time.
pub fn check(supplied_secret: &str, stored: &PasswordDigest) -> bool {
    let supplied = PasswordDigest::from_secret(supplied_secret);
    constant_time_eq(supplied.as_bytes(), stored.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Password and privilege checks guarding every mutating operation.
///
/// Privilege is always checked before the password.
#[derive(Debug, Clone)]
pub struct CredentialGate {
    digest: PasswordDigest,
    admin_euid: u32,
}

impl CredentialGate {
    pub fn new(digest: PasswordDigest, admin_euid: u32) -> Self {
        Self { digest, admin_euid }
    }

    pub fn check(&self, supplied_secret: &str) -> bool {
        check(supplied_secret, &self.digest)
    }

    pub fn check_privilege(&self, caller: &Principal) -> bool {
        caller.euid == self.admin_euid
    }

    pub fn authorize(&self, caller: &Principal, supplied_secret: &str) -> MonitorResult<()> {
        if !self.check_privilege(caller) {
            return Err(MonitorError::PermissionDenied);
        }
        if !self.check(supplied_secret) {
            return Err(MonitorError::InvalidCredential);
        }
        Ok(())
    }
}
