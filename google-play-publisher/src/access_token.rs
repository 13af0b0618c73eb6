// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! OAuth2 access tokens for service accounts.

use {
    crate::{PlayPublisherClient, Result},
    jsonwebtoken::{Algorithm, EncodingKey, Header},
    serde::{Deserialize, Serialize},
    std::time::{Duration, Instant, SystemTime},
};

/// OAuth2 scope granting access to the Android Publisher API.
pub const ANDROID_PUBLISHER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";

const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Google rejects assertions valid for longer than an hour.
const ASSERTION_LIFETIME_SECONDS: u64 = 3600;

/// Tokens are refreshed this long before the server says they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Deserialize, Serialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

/// A signed JWT used to obtain an access token.
pub type ServiceAccountAssertion = String;

/// Response of the OAuth2 token endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    pub token_type: String,
}

/// Issues signed assertions on behalf of a service account.
///
/// See <https://developers.google.com/identity/protocols/oauth2/service-account#authorizingrequests>.
///
/// An assertion is a JWT signed with the service account's RSA key. Google's
/// token endpoint trades it for a short-lived bearer token that the publisher
/// API accepts. The entity holds everything needed to mint new assertions:
///
/// * The private key identifier, sent as the JWT `kid`.
/// * The service account email, sent as the issuer.
/// * The token endpoint, sent as the audience.
/// * The RSA private key.
#[derive(Clone)]
pub struct ServiceAccountTokenEncoder {
    key_id: String,
    client_email: String,
    token_uri: String,
    scope: String,
    encoding_key: EncodingKey,
}

impl ServiceAccountTokenEncoder {
    /// Construct an instance from an [EncodingKey] instance.
    ///
    /// This is the lowest level API and ultimately what all constructors use.
    pub fn from_jwt_encoding_key(
        key_id: String,
        client_email: String,
        token_uri: String,
        encoding_key: EncodingKey,
    ) -> Self {
        Self {
            key_id,
            client_email,
            token_uri,
            scope: ANDROID_PUBLISHER_SCOPE.to_string(),
            encoding_key,
        }
    }

    /// Construct an instance from a PEM encoded RSA private key.
    pub fn from_rsa_pem(
        key_id: String,
        client_email: String,
        token_uri: String,
        pem_data: &[u8],
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(pem_data)?;

        Ok(Self::from_jwt_encoding_key(
            key_id,
            client_email,
            token_uri,
            encoding_key,
        ))
    }

    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Mint a new assertion valid for `duration` seconds.
    pub fn new_assertion(&self, duration: u64) -> Result<ServiceAccountAssertion> {
        let header = Header {
            kid: Some(self.key_id.clone()),
            alg: Algorithm::RS256,
            ..Default::default()
        };

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();

        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.token_uri.clone(),
            iat: now,
            exp: now + duration.min(ASSERTION_LIFETIME_SECONDS),
        };

        Ok(jsonwebtoken::encode(&header, &claims, &self.encoding_key)?)
    }
}

/// An access token together with the instant it stops being usable.
#[derive(Clone, Debug)]
pub(crate) struct CachedAccessToken {
    value: String,
    expires_at: Instant,
}

impl CachedAccessToken {
    pub(crate) fn new(token: AccessToken, obtained_at: Instant) -> Self {
        Self {
            value: token.access_token,
            expires_at: obtained_at + Duration::from_secs(token.expires_in),
        }
    }

    pub(crate) fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }

    pub(crate) fn value(&self) -> &str {
        &self.value
    }
}

impl PlayPublisherClient {
    /// Exchange a fresh assertion for an access token.
    pub fn request_access_token(&self) -> Result<AccessToken> {
        let assertion = self
            .token_encoder
            .new_assertion(ASSERTION_LIFETIME_SECONDS)?;

        log::info!(
            "requesting access token for {}",
            self.token_encoder.client_email()
        );

        let req = self
            .client
            .post(self.token_encoder.token_uri())
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", JWT_BEARER_GRANT_TYPE),
                ("assertion", assertion.as_str()),
            ]);

        Ok(self.send_request(req)?.json()?)
    }
}
