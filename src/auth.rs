use base64::prelude::*;
use google_cloud_auth::credentials::CredentialsFile;
use google_cloud_auth::project::{create_token_source_from_credentials, Config};
use std::env;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Google Play Android Publisher API scope
pub const ANDROID_PUBLISHER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";

/// Service-account credentials used to call the Play Developer API.
#[derive(Clone)]
pub struct GoogleAuth {
    credentials: CredentialsFile,
}

impl GoogleAuth {
    /// Create a new GoogleAuth instance from environment variables.
    ///
    /// Reads `GOOGLE_SERVICE_ACCOUNT_JSON`, or failing that the base64 encoded
    /// `GOOGLE_SERVICE_ACCOUNT_JSON_B64`.
    pub fn from_env() -> Result<Self, BoxError> {
        let service_account_json = match env::var("GOOGLE_SERVICE_ACCOUNT_JSON") {
            Ok(json) => json,
            Err(_) => {
                let encoded = env::var("GOOGLE_SERVICE_ACCOUNT_JSON_B64").map_err(|_| {
                    "GOOGLE_SERVICE_ACCOUNT_JSON or GOOGLE_SERVICE_ACCOUNT_JSON_B64 must be set"
                })?;
                String::from_utf8(BASE64_STANDARD.decode(encoded.trim())?)?
            }
        };

        Self::from_json(&service_account_json)
    }

    pub fn from_json(service_account_json: &str) -> Result<Self, BoxError> {
        let credentials: CredentialsFile = serde_json::from_str(service_account_json)?;
        Ok(Self { credentials })
    }

    /// True when credentials are configured, without parsing them.
    pub fn is_configured() -> bool {
        env::var("GOOGLE_SERVICE_ACCOUNT_JSON").is_ok()
            || env::var("GOOGLE_SERVICE_ACCOUNT_JSON_B64").is_ok()
    }

    pub async fn get_token(&self, scopes: &[&str]) -> Result<String, BoxError> {
        let config = Config {
            scopes: Some(scopes),
            ..Default::default()
        };

        let token_source = create_token_source_from_credentials(&self.credentials, &config).await?;

        let token = token_source.token().await?;
        Ok(token.access_token)
    }

    pub async fn get_token_for_default_scopes(&self) -> Result<String, BoxError> {
        self.get_token(&[ANDROID_PUBLISHER_SCOPE]).await
    }
}
