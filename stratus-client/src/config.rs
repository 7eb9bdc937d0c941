use stratus_core::locale::{FALLBACK_LOCALE, best_match};
use stratus_core::sign::AppIdentity;

const DEFAULT_API_BASE: &str = "https://api.stratusdrive.com";
const DEFAULT_CONTENT_BASE: &str = "https://api-content.stratusdrive.com";

/// Which namespace all paths are resolved against. `Drive` sees the whole
/// account, `Sandbox` only the app's own folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessRoot {
    #[default]
    Drive,
    Sandbox,
}

impl AccessRoot {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessRoot::Drive => "drive",
            AccessRoot::Sandbox => "sandbox",
        }
    }
}

/// Session-wide configuration, built once at startup and passed by
/// reference into the signer. There are no process-wide statics.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub app: AppIdentity,
    pub api_base: String,
    pub content_base: String,
    pub root: AccessRoot,
    pub locale: &'static str,
}

impl SessionConfig {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            app: AppIdentity::new(app_name, app_version),
            api_base: DEFAULT_API_BASE.into(),
            content_base: DEFAULT_CONTENT_BASE.into(),
            root: AccessRoot::default(),
            locale: FALLBACK_LOCALE,
        }
    }

    /// Resolves the caller's preferred UI language against the supported
    /// table; unknown languages fall back to `en`.
    pub fn with_preferred_locale(mut self, preferred: &str) -> Self {
        self.locale = best_match(preferred);
        self
    }

    pub fn with_root(mut self, root: AccessRoot) -> Self {
        self.root = root;
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = trim_base(base.into());
        self
    }

    pub fn with_content_base(mut self, base: impl Into<String>) -> Self {
        self.content_base = trim_base(base.into());
        self
    }
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}

/// Folders are addressed with a trailing separator so a filename can be
/// appended directly.
pub fn normalize_folder(folder: &str) -> String {
    let mut normalized = if folder.starts_with('/') {
        folder.to_string()
    } else {
        format!("/{folder}")
    };
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}
