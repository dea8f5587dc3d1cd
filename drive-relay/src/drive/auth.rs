//! Service-account authentication (OAuth 2.0 JWT bearer grant).
//!
//! Building a [`ServiceAccountAuth`] does no I/O and no key parsing; a bad private key or a
//! rejected grant only shows up when [`ServiceAccountAuth::access_token`] runs inside the upload.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::DriveError;
use crate::credentials::ServiceAccountKey;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each assertion. Google caps it at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Claims of the signed assertion sent to the token endpoint
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionClaims {
    pub iss: String,   // Service account email
    pub scope: String, // Space-separated scopes
    pub aud: String,   // Token endpoint
    pub iat: i64,      // Issued at
    pub exp: i64,      // Expiration time
}

/// Token endpoint reply
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// OAuth error reply, e.g. `{"error": "invalid_grant", "error_description": "Invalid JWT Signature."}`
#[derive(Debug, Deserialize)]
struct OAuthError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    scopes: Vec<String>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, scopes: Vec<String>) -> Self {
        Self { key, scopes }
    }

    pub fn claims(&self, now: DateTime<Utc>) -> AssertionClaims {
        AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scopes.join(" "),
            aud: self.key.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        }
    }

    /// Sign an RS256 assertion for the token endpoint
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String, DriveError> {
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes()).map_err(|e| DriveError::Auth {
            message: format!("invalid service account private key: {e}"),
        })?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        encode(&header, &self.claims(now), &key).map_err(|e| DriveError::Auth {
            message: format!("failed to sign service account assertion: {e}"),
        })
    }

    /// Exchange a fresh assertion for an access token
    #[instrument(skip_all, fields(client_email = %self.key.client_email), err)]
    pub async fn access_token(&self, http: &Client) -> Result<AccessToken, DriveError> {
        let assertion = self.assertion(Utc::now())?;

        debug!(token_uri = %self.key.token_uri, "Requesting access token");
        let response = http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<OAuthError>(&body) {
                Ok(OAuthError {
                    error,
                    error_description: Some(description),
                }) => format!("{error}: {description}"),
                Ok(OAuthError { error, .. }) => error,
                Err(_) if !body.is_empty() => body,
                Err(_) => format!("token endpoint returned {status}"),
            };
            return Err(DriveError::Auth { message });
        }

        Ok(response.json::<AccessToken>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_PUBLIC_KEY_PEM, test_http_client, test_service_account_key};
    use chrono::TimeZone;
    use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth(token_uri: &str) -> ServiceAccountAuth {
        ServiceAccountAuth::new(
            test_service_account_key(token_uri),
            vec!["https://www.googleapis.com/auth/drive.file".to_string()],
        )
    }

    #[test]
    fn test_claims() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let claims = auth("https://oauth2.example.com/token").claims(now);

        assert_eq!(claims.iss, "relay@drive-relay-tests.iam.gserviceaccount.com");
        assert_eq!(claims.scope, "https://www.googleapis.com/auth/drive.file");
        assert_eq!(claims.aud, "https://oauth2.example.com/token");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_assertion_is_signed_with_service_account_key() {
        let auth = auth("https://oauth2.example.com/token");
        let now = Utc::now();
        let token = auth.assertion(now).unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("test-key-1"));

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://oauth2.example.com/token"]);
        let decoded = decode::<AssertionClaims>(
            &token,
            &DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY_PEM.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims, auth.claims(now));
    }

    #[test]
    fn test_bad_private_key_fails_only_when_signing() {
        let mut key = test_service_account_key("https://oauth2.example.com/token");
        key.private_key = "not a key".to_string();
        let auth = ServiceAccountAuth::new(key, vec!["scope".to_string()]);

        let err = auth.assertion(Utc::now()).unwrap_err();
        assert!(matches!(err, DriveError::Auth { .. }));
    }

    #[tokio::test]
    async fn test_access_token_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .and(body_string_contains("assertion="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.test-token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = auth(&format!("{}/token", server.uri()))
            .access_token(&test_http_client())
            .await
            .unwrap();

        assert_eq!(token.access_token, "ya29.test-token");
        assert_eq!(token.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn test_rejected_grant_surfaces_oauth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid JWT Signature."
            })))
            .mount(&server)
            .await;

        let err = auth(&format!("{}/token", server.uri()))
            .access_token(&test_http_client())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "invalid_grant: Invalid JWT Signature.");
    }
}
