use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::distributions::Alphanumeric;
use stratus_core::sign::{OAuthParameters, SignatureMethod, SigningContext, encode};

/// Supplies credential material for request signing. The session consumes
/// this as an opaque provider; token acquisition and persistence live
/// elsewhere.
pub trait CredentialProvider: Send + Sync {
    fn signing_key(&self) -> String;
    fn signature_method(&self) -> SignatureMethod;
    fn oauth_parameters(&self) -> OAuthParameters;

    /// Invoked when the service answers 401 before the failure is surfaced
    /// to the listener. Typically triggers a re-authorization flow.
    fn on_authorization_failure(&self) {}
}

pub(crate) fn signing_context(provider: &dyn CredentialProvider) -> SigningContext {
    SigningContext {
        params: provider.oauth_parameters(),
        signing_key: provider.signing_key(),
        method: provider.signature_method(),
    }
}

/// An already-authorized credential pair held in memory. Nonce and
/// timestamp are freshly generated per request.
pub struct StaticCredentials {
    consumer_key: String,
    consumer_secret: String,
    access_token: String,
    token_secret: String,
    method: SignatureMethod,
}

impl StaticCredentials {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        access_token: impl Into<String>,
        token_secret: impl Into<String>,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            access_token: access_token.into(),
            token_secret: token_secret.into(),
            method: SignatureMethod::HmacSha1,
        }
    }

    pub fn with_signature_method(mut self, method: SignatureMethod) -> Self {
        self.method = method;
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn signing_key(&self) -> String {
        format!(
            "{}&{}",
            encode(&self.consumer_secret),
            encode(&self.token_secret)
        )
    }

    fn signature_method(&self) -> SignatureMethod {
        self.method
    }

    fn oauth_parameters(&self) -> OAuthParameters {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        OAuthParameters {
            consumer_key: self.consumer_key.clone(),
            access_token: self.access_token.clone(),
            nonce,
            timestamp,
        }
    }
}
