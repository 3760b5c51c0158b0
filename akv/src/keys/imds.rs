// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! This module implements the [CredentialProvider] protocol in terms of the managed identity of the
//! Azure compute resource that the process runs on.
//!
//! Tokens are requested from the Instance Metadata Service (IMDS), or from whichever endpoint the
//! `IDENTITY_ENDPOINT` environment variable names (App Service, Arc and Cloud Shell all expose a
//! compatible endpoint). A ready-made token can also be supplied through `AZURE_CLI_ACCESS_TOKEN`,
//! which is convenient on developer machines that have no managed identity.

use super::error::KeyError;
use super::{AccessToken, CredentialProvider, Result, VaultType};
use crate::config::EngineConfig;

use reqwest::blocking::Client;
use serde_json::Value;

/// The IMDS token API version.
const IMDS_API_VERSION: &str = "2018-02-01";

/// Obtains vault tokens from the managed identity endpoint.
#[derive(Debug)]
pub struct ImdsCredentialProvider {
    client: Client,
    endpoint: String,
    token_override: Option<AccessToken>,
}

impl ImdsCredentialProvider {
    /// Creates a provider from the given configuration. The configuration is captured now.
    pub fn from_config(config: &EngineConfig) -> Result<ImdsCredentialProvider> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(ImdsCredentialProvider {
            client,
            endpoint: config.identity_endpoint.clone(),
            token_override: config
                .access_token_override
                .as_ref()
                .map(|token| AccessToken::new(token.as_str())),
        })
    }

    fn request_token(&self, vault_type: VaultType) -> Result<AccessToken> {
        log::debug!(
            "Requesting a token for {} from {}.",
            vault_type.resource(),
            self.endpoint
        );
        let body = self
            .client
            .get(self.endpoint.as_str())
            .query(&[
                ("api-version", IMDS_API_VERSION),
                ("resource", vault_type.resource()),
            ])
            .header("Metadata", "true")
            .send()?
            .text()?;
        parse_token_response(&body)
    }
}

impl CredentialProvider for ImdsCredentialProvider {
    fn get_token(&self, vault_type: VaultType) -> Result<AccessToken> {
        if let Some(token) = &self.token_override {
            log::trace!("Using the access token from the environment.");
            return Ok(AccessToken::new(token.secret()));
        }
        self.request_token(vault_type).map_err(KeyError::credential)
    }
}

/// Extracts the bearer token from the JSON body returned by the identity endpoint.
pub(crate) fn parse_token_response(body: &str) -> Result<AccessToken> {
    let root: Value = serde_json::from_str(body)?;
    match root.get("access_token").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
        _ => {
            let detail = match root.get("error") {
                Some(error) => {
                    let description = root
                        .get("error_description")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    format!("{} {}", error, description).trim().to_string()
                }
                None => String::from("no access_token in the identity endpoint response"),
            };
            log::error!(
                "No access token from the identity endpoint ({}). Is a managed identity available?",
                detail
            );
            Err(KeyError::CredentialError(Box::new(KeyError::ServiceError(
                detail,
            ))))
        }
    }
}
