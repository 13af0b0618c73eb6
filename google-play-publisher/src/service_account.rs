// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Service account keys.

use {
    crate::{Result, ServiceAccountTokenEncoder},
    anyhow::Context,
    serde::{Deserialize, Serialize},
    std::path::Path,
    thiserror::Error,
};

pub const GOOGLE_OAUTH2_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

fn default_token_uri() -> String {
    GOOGLE_OAUTH2_TOKEN_URL.to_string()
}

/// A Google Cloud service account key, as downloaded from the Cloud console.
///
/// Only the fields needed to mint OAuth2 assertions are retained. Other fields
/// in the file (`client_id`, `auth_uri`, certificate URLs) are ignored.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceAccountKey {
    /// Always `service_account` for keys we can use.
    #[serde(rename = "type")]
    pub key_type: String,

    /// Cloud project owning the service account.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Identifier of the private key. Becomes the `kid` of issued assertions.
    pub private_key_id: String,

    /// PKCS#8 PEM encoded RSA private key.
    pub private_key: String,

    /// e.g. `publisher@my-project.iam.gserviceaccount.com`.
    pub client_email: String,

    /// OAuth2 endpoint assertions are exchanged at.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// Construct an instance from serialized JSON.
    pub fn from_json(data: impl AsRef<[u8]>) -> Result<Self> {
        let key: Self = serde_json::from_slice(data.as_ref())?;

        if key.key_type != "service_account" {
            return Err(InvalidServiceAccountKey(key.key_type).into());
        }

        Ok(key)
    }

    /// Construct an instance from a JSON file.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("reading service account key {}", path.display()))?;

        Self::from_json(data)
            .with_context(|| format!("parsing service account key {}", path.display()))
    }

    /// Ensure the private key is a single PKCS#8 PEM block.
    pub fn check_private_key(&self) -> Result<()> {
        let parsed = pem::parse(self.private_key.as_bytes()).map_err(|_| InvalidPemPrivateKey)?;

        if parsed.tag() != "PRIVATE KEY" || parsed.contents().is_empty() {
            return Err(InvalidPemPrivateKey.into());
        }

        Ok(())
    }
}

impl TryFrom<ServiceAccountKey> for ServiceAccountTokenEncoder {
    type Error = anyhow::Error;

    fn try_from(value: ServiceAccountKey) -> Result<Self> {
        value
            .check_private_key()
            .context("invalid service account key")?;

        Self::from_rsa_pem(
            value.private_key_id,
            value.client_email,
            value.token_uri,
            value.private_key.as_bytes(),
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("invalid PEM formatted private key")]
pub struct InvalidPemPrivateKey;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("unsupported credential type \"{0}\"; expected a service_account key")]
pub struct InvalidServiceAccountKey(String);
