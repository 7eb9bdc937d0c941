use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::Sha1;

/// Version segment of every API path: `https://{host}/1{path}`.
pub const API_VERSION: u32 = 1;

/// Fixed per-request timeout attached to every signed request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path escaping keeps the separator but escapes every other reserved
/// character (`:?=,!$&'()*+;[]@#~` included) and all non-ASCII bytes.
const PATH_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_');

/// Parameter keys and values use the signing scheme's unreserved set:
/// alphanumerics plus `-._~`.
const PARAM_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    HmacSha1,
    Plaintext,
}

impl SignatureMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SignatureMethod::HmacSha1 => "HMAC-SHA1",
            SignatureMethod::Plaintext => "PLAINTEXT",
        }
    }
}

/// Per-request authorization parameters supplied by the credential provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthParameters {
    pub consumer_key: String,
    pub access_token: String,
    pub nonce: String,
    pub timestamp: u64,
}

/// Everything needed to produce a valid signature for one request.
/// Immutable for the lifetime of the operation it signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub params: OAuthParameters,
    pub signing_key: String,
    pub method: SignatureMethod,
}

/// Identity of the embedding application, used to build the user agent.
/// Built once at startup and passed by reference into the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub name: String,
    pub version: String,
}

impl AppIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn user_agent(&self) -> String {
        format!("{}/{} stratus-sdk/{}", self.name, self.version, SDK_VERSION)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    LocalFile(PathBuf),
}

/// A fully canonical request: final URL with sorted signed query, method,
/// user agent and timeout. Handed to the transport as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: Method,
    pub url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub content_type: Option<&'static str>,
    pub content_length: Option<u64>,
    pub body: RequestBody,
}

/// Builds a signed request for a body-less API call. All parameters,
/// including the signature, travel in the query string.
///
/// Panics on empty base/path/consumer key: those are caller bugs, not
/// recoverable conditions.
pub fn sign_request(
    ctx: &SigningContext,
    app: &AppIdentity,
    locale: &str,
    base: &str,
    path: &str,
    method: Method,
    params: &[(String, String)],
) -> SignedRequest {
    let (url, query) = signed_url(ctx, locale, base, path, method, params);
    SignedRequest {
        method,
        url: format!("{url}?{query}"),
        user_agent: app.user_agent(),
        timeout: REQUEST_TIMEOUT,
        content_type: None,
        content_length: None,
        body: RequestBody::Empty,
    }
}

/// Builds a signed request for a body-bearing (upload-style) call. The body
/// is opaque and excluded from the signature base; the method is forced to
/// POST and `Content-Length`/`Content-Type` are set explicitly.
pub fn sign_upload(
    ctx: &SigningContext,
    app: &AppIdentity,
    locale: &str,
    base: &str,
    path: &str,
    params: &[(String, String)],
    body: RequestBody,
    content_length: u64,
) -> SignedRequest {
    let (url, query) = signed_url(ctx, locale, base, path, Method::Post, params);
    SignedRequest {
        method: Method::Post,
        url: format!("{url}?{query}"),
        user_agent: app.user_agent(),
        timeout: REQUEST_TIMEOUT,
        content_type: Some("application/octet-stream"),
        content_length: Some(content_length),
        body,
    }
}

fn signed_url(
    ctx: &SigningContext,
    locale: &str,
    base: &str,
    path: &str,
    method: Method,
    params: &[(String, String)],
) -> (String, String) {
    assert!(!base.is_empty(), "base url is required");
    assert!(path.starts_with('/'), "path must be absolute");
    assert!(
        !ctx.params.consumer_key.is_empty(),
        "consumer key is required"
    );

    let url = format!("{base}/{API_VERSION}{}", escape_path(path));

    let mut pairs: Vec<(String, String)> = vec![
        ("oauth_consumer_key".into(), encode(&ctx.params.consumer_key)),
        ("oauth_nonce".into(), encode(&ctx.params.nonce)),
        (
            "oauth_signature_method".into(),
            encode(ctx.method.as_str()),
        ),
        ("oauth_timestamp".into(), ctx.params.timestamp.to_string()),
        ("oauth_version".into(), "1.0".into()),
        ("locale".into(), encode(locale)),
    ];
    if !ctx.params.access_token.is_empty() {
        pairs.push(("oauth_token".into(), encode(&ctx.params.access_token)));
    }
    for (key, value) in params {
        pairs.push((encode(key), encode(value)));
    }
    // The signing scheme mandates ordering by encoded key, ties broken by
    // encoded value; the server recomputes the same canonical string.
    pairs.sort();

    let param_string = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.as_str(),
        encode(&url),
        encode(&param_string)
    );
    let signature = match ctx.method {
        SignatureMethod::HmacSha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(ctx.signing_key.as_bytes())
                .expect("hmac accepts any key length");
            mac.update(base_string.as_bytes());
            BASE64.encode(mac.finalize().into_bytes())
        }
        SignatureMethod::Plaintext => ctx.signing_key.clone(),
    };

    let query = format!("{param_string}&oauth_signature={}", encode(&signature));
    (url, query)
}

pub fn escape_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_ESCAPE).to_string()
}

pub fn encode(component: &str) -> String {
    utf8_percent_encode(component, PARAM_ESCAPE).to_string()
}
