// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! This module implements the [RemoteKeyClient] protocol in terms of the Azure Key Vault REST API,
//! which is served by both standard key vaults and Managed HSM pools.
//!
//! Keys are fetched with `GET https://<vault>.<suffix>/keys/<key>`, and private-key operations are
//! `POST` requests to the `sign`, `decrypt` and `encrypt` sub-resources of the key. Binary values
//! travel as unpadded base64url strings, both in requests and responses.

use super::error::KeyError;
use super::{
    AccessToken, EcCurve, EncryptionAlgorithm, PublicKeyMaterial, RemoteKeyClient, Result,
    SignatureAlgorithm, VaultReference,
};
use crate::config::EngineConfig;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Talks to a key vault or managed HSM over HTTPS.
#[derive(Debug)]
pub struct HttpKeyVaultClient {
    client: Client,
    api_version: String,
}

/// The JSON Web Key inside a key bundle. Only the public members are of interest.
#[derive(Deserialize, Debug)]
struct JsonWebKey {
    kty: Option<String>,
    n: Option<String>,
    e: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

#[derive(Deserialize, Debug)]
struct KeyBundle {
    key: Option<JsonWebKey>,
    error: Option<Value>,
}

#[derive(Serialize, Debug)]
struct KeyOperationRequest<'a> {
    alg: &'a str,
    value: String,
}

#[derive(Deserialize, Debug)]
struct KeyOperationResult {
    value: Option<String>,
    error: Option<Value>,
}

pub(crate) fn b64url_encode(data: &[u8]) -> String {
    base64::encode_config(data, base64::URL_SAFE_NO_PAD)
}

pub(crate) fn b64url_decode(text: &str) -> Result<Vec<u8>> {
    Ok(base64::decode_config(
        text.trim_end_matches('='),
        base64::URL_SAFE_NO_PAD,
    )?)
}

/// Turns the `error` member of a vault response into a [KeyError], logging it on the way.
fn service_error(error: Option<&Value>) -> KeyError {
    let detail = match error {
        Some(error) => {
            let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
            let message = error.get("message").and_then(Value::as_str).unwrap_or("");
            format!("{}: {}", code, message)
        }
        None => String::from("unknown"),
    };
    log::error!("Vault error {}", detail);
    KeyError::ServiceError(detail)
}

fn required<'a>(member: &'a Option<String>, name: &str) -> Result<&'a str> {
    member
        .as_deref()
        .ok_or_else(|| KeyError::InvalidKeyMaterial(format!("the key has no '{}' member", name)))
}

fn non_empty(bytes: Vec<u8>, name: &str) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        Err(KeyError::InvalidKeyMaterial(format!(
            "the key's '{}' member is empty",
            name
        )))
    } else {
        Ok(bytes)
    }
}

fn material_from_jwk(jwk: &JsonWebKey) -> Result<PublicKeyMaterial> {
    let kty = required(&jwk.kty, "kty")?;
    if kty.eq_ignore_ascii_case("RSA") || kty.eq_ignore_ascii_case("RSA-HSM") {
        let n = non_empty(b64url_decode(required(&jwk.n, "n")?)?, "n")?;
        let e = non_empty(b64url_decode(required(&jwk.e, "e")?)?, "e")?;
        Ok(PublicKeyMaterial::Rsa { n, e })
    } else if kty.eq_ignore_ascii_case("EC") || kty.eq_ignore_ascii_case("EC-HSM") {
        let crv = required(&jwk.crv, "crv")?;
        let curve = EcCurve::from_jwk_name(crv).ok_or_else(|| {
            KeyError::InvalidKeyMaterial(format!("curve '{}' is not supported", crv))
        })?;
        let x = non_empty(b64url_decode(required(&jwk.x, "x")?)?, "x")?;
        let y = non_empty(b64url_decode(required(&jwk.y, "y")?)?, "y")?;
        Ok(PublicKeyMaterial::Ec { curve, x, y })
    } else {
        Ok(PublicKeyMaterial::Other {
            kty: String::from(kty),
        })
    }
}

/// Extracts the public key material from the body of a `GET /keys/<name>` response.
pub(crate) fn material_from_key_bundle(body: &str) -> Result<PublicKeyMaterial> {
    let bundle: KeyBundle = serde_json::from_str(body)?;
    match &bundle.key {
        Some(jwk) => material_from_jwk(jwk),
        None => Err(service_error(bundle.error.as_ref())),
    }
}

/// Extracts and decodes the `value` member of a key operation response.
pub(crate) fn value_from_operation_result(body: &str) -> Result<Vec<u8>> {
    let result: KeyOperationResult = serde_json::from_str(body)?;
    match &result.value {
        Some(value) => b64url_decode(value),
        None => Err(service_error(result.error.as_ref())),
    }
}

impl HttpKeyVaultClient {
    /// Creates a client from the given configuration. The configuration is captured now.
    pub fn from_config(config: &EngineConfig) -> Result<HttpKeyVaultClient> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(HttpKeyVaultClient {
            client,
            api_version: config.api_version.clone(),
        })
    }

    /// The URL of the key, or of one of its operations, without the query string.
    pub fn key_url(reference: &VaultReference, operation: Option<&str>) -> String {
        let mut url = format!(
            "https://{}.{}/keys/{}",
            reference.vault_name(),
            reference.vault_type().host_suffix(),
            reference.key_name()
        );
        if let Some(operation) = operation {
            url.push('/');
            url.push_str(operation);
        }
        url
    }

    fn operation(
        &self,
        reference: &VaultReference,
        token: &AccessToken,
        operation: &str,
        alg: &str,
        input: &[u8],
    ) -> Result<Vec<u8>> {
        let url = HttpKeyVaultClient::key_url(reference, Some(operation));
        log::debug!("POST {} alg={} ({} bytes).", url, alg, input.len());
        let request = KeyOperationRequest {
            alg,
            value: b64url_encode(input),
        };
        let body = self
            .client
            .post(url.as_str())
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token.secret())
            .json(&request)
            .send()?
            .text()?;
        value_from_operation_result(&body)
    }
}

impl RemoteKeyClient for HttpKeyVaultClient {
    fn fetch_public_key(
        &self,
        reference: &VaultReference,
        token: &AccessToken,
    ) -> Result<PublicKeyMaterial> {
        let url = HttpKeyVaultClient::key_url(reference, None);
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(url.as_str())
            .query(&[("api-version", self.api_version.as_str())])
            .header("Accept", "application/json")
            .bearer_auth(token.secret())
            .send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(KeyError::KeyNotFound);
        }
        material_from_key_bundle(&response.text()?)
    }

    fn sign(
        &self,
        reference: &VaultReference,
        token: &AccessToken,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>> {
        self.operation(reference, token, "sign", algorithm.as_str(), digest)
    }

    fn decrypt(
        &self,
        reference: &VaultReference,
        token: &AccessToken,
        algorithm: EncryptionAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        self.operation(reference, token, "decrypt", algorithm.as_str(), ciphertext)
    }

    fn encrypt(
        &self,
        reference: &VaultReference,
        token: &AccessToken,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        self.operation(reference, token, "encrypt", algorithm.as_str(), plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::error::ErrorKind;

    #[test]
    fn test_key_urls() {
        let reference = VaultReference::parse("vault:contoso:signing").unwrap();
        assert_eq!(
            HttpKeyVaultClient::key_url(&reference, None),
            "https://contoso.vault.azure.net/keys/signing"
        );
        let reference = VaultReference::parse("managedHsm:pool:tls").unwrap();
        assert_eq!(
            HttpKeyVaultClient::key_url(&reference, Some("sign")),
            "https://pool.managedhsm.azure.net/keys/tls/sign"
        );
    }

    #[test]
    fn test_rsa_key_bundle() {
        let body = r#"{
            "key": {
                "kid": "https://contoso.vault.azure.net/keys/signing/0123",
                "kty": "RSA-HSM",
                "key_ops": ["sign", "verify"],
                "n": "AQAB_w",
                "e": "AQAB"
            },
            "attributes": { "enabled": true }
        }"#;
        let material = material_from_key_bundle(body).unwrap();
        assert_eq!(
            material,
            PublicKeyMaterial::Rsa {
                n: vec![0x01, 0x00, 0x01, 0xff],
                e: vec![0x01, 0x00, 0x01],
            }
        );
    }

    #[test]
    fn test_ec_key_bundle() {
        let x = b64url_encode(&[7u8; 32]);
        let y = b64url_encode(&[9u8; 32]);
        let body = format!(
            r#"{{"key":{{"kty":"EC","crv":"P-256K","x":"{}","y":"{}"}}}}"#,
            x, y
        );
        match material_from_key_bundle(&body).unwrap() {
            PublicKeyMaterial::Ec { curve, x, y } => {
                assert_eq!(curve, EcCurve::P256K);
                assert_eq!(x, vec![7u8; 32]);
                assert_eq!(y, vec![9u8; 32]);
            }
            other => panic!("unexpected material {:?}", other),
        }
    }

    #[test]
    fn test_other_key_types_and_bad_curves() {
        let material = material_from_key_bundle(r#"{"key":{"kty":"oct-HSM"}}"#).unwrap();
        assert_eq!(
            material,
            PublicKeyMaterial::Other {
                kty: String::from("oct-HSM")
            }
        );

        let err = material_from_key_bundle(r#"{"key":{"kty":"EC","crv":"P-192","x":"AA","y":"AA"}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKeyMaterial);

        let err = material_from_key_bundle(r#"{"key":{"kty":"RSA","e":"AQAB"}}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKeyMaterial);
    }

    #[test]
    fn test_vault_error_document() {
        let body = r#"{"error":{"code":"Forbidden","message":"The user does not have keys get permission"}}"#;
        let err = material_from_key_bundle(body).unwrap_err();
        assert!(err.to_string().contains("Forbidden"));
        assert_eq!(KeyError::key_fetch(err).kind(), ErrorKind::KeyFetchError);

        let err = value_from_operation_result(body).unwrap_err();
        assert_eq!(KeyError::remote(err).kind(), ErrorKind::RemoteOperationError);
    }

    #[test]
    fn test_operation_value() {
        let body = r#"{"kid":"https://contoso.vault.azure.net/keys/signing/0123","value":"3q2-7w"}"#;
        assert_eq!(
            value_from_operation_result(body).unwrap(),
            vec![0xde, 0xad, 0xbe, 0xef]
        );
        assert_eq!(b64url_decode("3q2-7w==").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }
}
