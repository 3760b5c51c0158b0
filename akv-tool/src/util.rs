// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! General-purpose utilities used throughout the akv-tool crate.

use crate::error::{Result, ToolErrorKind};

use akv::config::EngineConfig;
use akv::keys::DigestAlgorithm;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::path::Path;

/// Builds the vault configuration from the environment, letting values given on the command line
/// take precedence.
pub fn engine_config(identity_endpoint: &Option<String>, api_version: &Option<String>) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(endpoint) = identity_endpoint {
        config.identity_endpoint = endpoint.clone();
    }
    if let Some(version) = api_version {
        config.api_version = version.clone();
    }
    config
}

/// Parses the value of a `--digest` option.
pub fn parse_digest(name: &str) -> std::result::Result<DigestAlgorithm, ToolErrorKind> {
    match name.to_ascii_lowercase().replace('-', "").as_str() {
        "sha256" => Ok(DigestAlgorithm::Sha256),
        "sha384" => Ok(DigestAlgorithm::Sha384),
        "sha512" => Ok(DigestAlgorithm::Sha512),
        _ => Err(ToolErrorKind::UnsupportedDigest(String::from(name))),
    }
}

/// Hashes data with the given algorithm.
pub fn digest(algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

/// Reads a whole input file, refusing empty ones.
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path)?;
    if data.is_empty() {
        return Err(ToolErrorKind::EmptyInput.into());
    }
    Ok(data)
}
