//! `AuthGate` (spec.md §4.6): API key validation against two disjoint key
//! sets, plus key generation for the `/auth/generate-key` route.

use rand::RngCore;
use resizr_util::Error;

/// Permission tier a validated key carries. `ReadWrite` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    Read,
    ReadWrite,
}

impl Permission {
    pub fn satisfies(&self, required: Permission) -> bool {
        *self >= required
    }
}

pub struct AuthGate {
    enabled: bool,
    read_write_keys: Vec<String>,
    read_only_keys: Vec<String>,
}

fn is_valid_key_shape(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

impl AuthGate {
    pub fn new(enabled: bool, read_write_keys: Vec<String>, read_only_keys: Vec<String>) -> Self {
        AuthGate {
            enabled,
            read_write_keys,
            read_only_keys,
        }
    }

    /// Validates `presented_key` against the configured sets and returns its
    /// permission tier. `None` means auth is disabled, in which case the
    /// caller never even reaches this check.
    pub fn authorize(&self, presented_key: Option<&str>) -> Result<Permission, Error> {
        if !self.enabled {
            return Ok(Permission::ReadWrite);
        }
        let key = presented_key.ok_or(Error::Unauthorized)?;
        if !is_valid_key_shape(key) {
            return Err(Error::Unauthorized);
        }
        if self.read_write_keys.iter().any(|k| k == key) {
            return Ok(Permission::ReadWrite);
        }
        if self.read_only_keys.iter().any(|k| k == key) {
            return Ok(Permission::Read);
        }
        Err(Error::Unauthorized)
    }

    /// Checks a resolved permission against a route's requirement, mapping
    /// an insufficient tier to `Forbidden` rather than `Unauthorized`.
    pub fn require(&self, granted: Permission, required: Permission) -> Result<(), Error> {
        if granted.satisfies(required) {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn read_write_key_count(&self) -> usize {
        self.read_write_keys.len()
    }

    pub fn read_only_key_count(&self) -> usize {
        self.read_only_keys.len()
    }

    /// Mints a fresh 32-byte random key as 64 lowercase hex chars. Does not
    /// persist anywhere; the operator installs it into configuration.
    pub fn generate_key() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// First 8 chars plus `*` for the rest, for safe inclusion in logs.
    pub fn mask(key: &str) -> String {
        if key.len() <= 8 {
            "*".repeat(key.len())
        } else {
            let (head, tail) = key.split_at(8);
            format!("{}{}", head, "*".repeat(tail.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_gate_grants_readwrite_without_a_key() {
        let gate = AuthGate::new(false, vec![], vec![]);
        assert_eq!(gate.authorize(None).unwrap(), Permission::ReadWrite);
    }

    #[test]
    fn missing_key_is_unauthorized() {
        let gate = AuthGate::new(true, vec!["a".repeat(64)], vec![]);
        assert!(matches!(gate.authorize(None), Err(Error::Unauthorized)));
    }

    #[test]
    fn read_only_key_cannot_satisfy_readwrite() {
        let ro = "b".repeat(64);
        let gate = AuthGate::new(true, vec![], vec![ro.clone()]);
        let granted = gate.authorize(Some(&ro)).unwrap();
        assert_eq!(granted, Permission::Read);
        assert!(matches!(
            gate.require(granted, Permission::ReadWrite),
            Err(Error::Forbidden)
        ));
    }

    #[test]
    fn uppercase_hex_is_rejected() {
        let key = "A".repeat(64);
        let gate = AuthGate::new(true, vec![key.clone()], vec![]);
        assert!(matches!(gate.authorize(Some(&key)), Err(Error::Unauthorized)));
    }

    #[test]
    fn generated_keys_have_valid_shape() {
        let key = AuthGate::generate_key();
        assert!(is_valid_key_shape(&key));
    }

    #[test]
    fn mask_preserves_only_the_first_eight_chars() {
        let key = "abcdef0123456789".to_string() + &"0".repeat(48);
        let masked = AuthGate::mask(&key);
        assert!(masked.starts_with("abcdef01"));
        assert!(masked[8..].bytes().all(|b| b == b'*'));
        assert_eq!(masked.len(), key.len());
    }
}
