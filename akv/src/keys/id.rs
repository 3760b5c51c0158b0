// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Key identifiers.
//!
//! A key is addressed by a string of the form `<vault type>:<vault name>:<key name>`, for example
//! `vault:contoso-kv:release-signing` or `managedHsm:contoso-hsm:tls`. The vault type is matched
//! case-insensitively.

use super::error::KeyError;
use super::Result;
use std::fmt;
use std::str::FromStr;

/// The maximum size, in bytes, of each component of a key identifier.
pub const KEY_ID_MAX_SIZE: usize = 255;

/// The kinds of vault service that can hold a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VaultType {
    /// A dedicated Managed HSM pool.
    ManagedHsm,
    /// A standard Key Vault.
    Vault,
}

impl VaultType {
    /// The token audience for this kind of vault.
    pub fn resource(&self) -> &'static str {
        match self {
            VaultType::ManagedHsm => "https://managedhsm.azure.net",
            VaultType::Vault => "https://vault.azure.net",
        }
    }

    /// The DNS suffix that follows the vault name in the service endpoint.
    pub fn host_suffix(&self) -> &'static str {
        match self {
            VaultType::ManagedHsm => "managedhsm.azure.net",
            VaultType::Vault => "vault.azure.net",
        }
    }
}

impl FromStr for VaultType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<VaultType> {
        if s.eq_ignore_ascii_case("managedHsm") {
            Ok(VaultType::ManagedHsm)
        } else if s.eq_ignore_ascii_case("vault") {
            Ok(VaultType::Vault)
        } else {
            Err(KeyError::InvalidKeyId(format!("unknown vault type '{}'", s)))
        }
    }
}

impl fmt::Display for VaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultType::ManagedHsm => f.write_str("managedHsm"),
            VaultType::Vault => f.write_str("vault"),
        }
    }
}

/// The location of a key: which vault it lives in and what it is called there.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VaultReference {
    vault_type: VaultType,
    vault_name: String,
    key_name: String,
}

fn check_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(KeyError::InvalidKeyId(format!("the {} is empty", what)));
    }
    if value.len() > KEY_ID_MAX_SIZE {
        return Err(KeyError::InvalidKeyId(format!(
            "the {} is longer than {} bytes",
            what, KEY_ID_MAX_SIZE
        )));
    }
    Ok(())
}

impl VaultReference {
    /// Creates a reference from its parts, applying the same rules as [VaultReference::parse].
    pub fn new(vault_type: VaultType, vault_name: &str, key_name: &str) -> Result<VaultReference> {
        check_component("vault name", vault_name)?;
        check_component("key name", key_name)?;
        Ok(VaultReference {
            vault_type,
            vault_name: String::from(vault_name),
            key_name: String::from(key_name),
        })
    }

    /// Parses a `<vault type>:<vault name>:<key name>` identifier.
    ///
    /// The identifier must split into exactly three non-empty components, each no longer than
    /// [KEY_ID_MAX_SIZE] bytes, and the first component must name a known [VaultType].
    pub fn parse(key_id: &str) -> Result<VaultReference> {
        let parts: Vec<&str> = key_id.split(':').collect();
        if parts.len() != 3 {
            return Err(KeyError::InvalidKeyId(format!(
                "expected <vault type>:<vault name>:<key name>, found {} component(s)",
                parts.len()
            )));
        }

        check_component("vault type", parts[0])?;
        let vault_type = VaultType::from_str(parts[0])?;
        VaultReference::new(vault_type, parts[1], parts[2])
    }

    pub fn vault_type(&self) -> VaultType {
        self.vault_type
    }

    pub fn vault_name(&self) -> &str {
        &self.vault_name
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }
}

impl FromStr for VaultReference {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<VaultReference> {
        VaultReference::parse(s)
    }
}

impl fmt::Display for VaultReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.vault_type, self.vault_name, self.key_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::error::ErrorKind;

    fn parse_kind(key_id: &str) -> ErrorKind {
        VaultReference::parse(key_id).unwrap_err().kind()
    }

    #[test]
    fn test_parse_valid_identifiers() {
        let reference = VaultReference::parse("vault:contoso-kv:release-signing").unwrap();
        assert_eq!(reference.vault_type(), VaultType::Vault);
        assert_eq!(reference.vault_name(), "contoso-kv");
        assert_eq!(reference.key_name(), "release-signing");

        let reference = VaultReference::parse("managedHsm:contoso-hsm:tls").unwrap();
        assert_eq!(reference.vault_type(), VaultType::ManagedHsm);
    }

    #[test]
    fn test_vault_type_is_case_insensitive() {
        for key_id in &["VAULT:a:b", "Vault:a:b", "MANAGEDHSM:a:b", "managedhsm:a:b"] {
            assert!(VaultReference::parse(key_id).is_ok(), "{}", key_id);
        }
    }

    #[test]
    fn test_parse_rejects_malformed_identifiers() {
        for key_id in &[
            "",
            "vault",
            "vault:name",
            "vault:name:key:extra",
            ":name:key",
            "vault::key",
            "vault:name:",
            "keyvault:name:key",
            "hsm:name:key",
        ] {
            assert_eq!(parse_kind(key_id), ErrorKind::ParseError, "{}", key_id);
        }
    }

    #[test]
    fn test_component_size_limit() {
        let longest = "k".repeat(KEY_ID_MAX_SIZE);
        let key_id = format!("vault:{}:{}", longest, longest);
        assert!(VaultReference::parse(&key_id).is_ok());

        let too_long = "k".repeat(KEY_ID_MAX_SIZE + 1);
        assert_eq!(
            parse_kind(&format!("vault:name:{}", too_long)),
            ErrorKind::ParseError
        );
        assert_eq!(
            parse_kind(&format!("vault:{}:key", too_long)),
            ErrorKind::ParseError
        );
    }

    #[test]
    fn test_display_round_trips() {
        let reference = VaultReference::parse("MANAGEDHSM:pool:key-1").unwrap();
        assert_eq!(reference.to_string(), "managedHsm:pool:key-1");
        assert_eq!(
            reference.to_string().parse::<VaultReference>().unwrap(),
            reference
        );
    }

    #[test]
    fn test_vault_type_endpoints() {
        assert_eq!(VaultType::Vault.resource(), "https://vault.azure.net");
        assert_eq!(VaultType::ManagedHsm.host_suffix(), "managedhsm.azure.net");
    }
}
