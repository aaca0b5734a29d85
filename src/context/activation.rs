//! Activation context parsing
//!
//! An external trigger (the `notchvoice://activate?...` URL scheme, or the
//! menu bar app forwarding its parameters over IPC) can carry hints about
//! what the user wants to talk about. They are folded into an
//! `ActivationContext` and sent to the agent as the first system message.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::{form_urlencoded, Url};

/// URL host that marks an activation request
pub const ACTIVATE_HOST: &str = "activate";

/// Structured hints supplied when a session is activated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationContext {
    /// Agent session to continue
    pub session_id: Option<String>,
    /// URL to discuss, exactly as supplied
    pub url: Option<String>,
    /// Free text to discuss
    pub text: Option<String>,
    /// File to discuss
    pub file_path: Option<String>,
    /// Every non-empty parameter as received
    pub raw_params: BTreeMap<String, String>,
}

impl ActivationContext {
    /// Build a context from query-style key/value pairs
    ///
    /// Empty values are treated as absent and later duplicates win.
    /// Unparseable URLs are dropped; nothing here fails. Links without a
    /// scheme such as `github.com/foo` are kept.
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut context = Self::default();

        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref());
            if value.is_empty() {
                continue;
            }

            context.raw_params.insert(key.to_string(), value.to_string());

            match key {
                "session" | "session_id" => context.session_id = Some(value.to_string()),
                "url" | "link" => context.url = is_link(value).then(|| value.to_string()),
                "text" | "content" => context.text = Some(value.to_string()),
                "file" | "path" => context.file_path = Some(value.to_string()),
                _ => {}
            }
        }

        context
    }

    /// Build a context from the query string of an activation URL
    ///
    /// Values are percent-decoded only; a literal `+` stays a `+`.
    pub fn from_url(url: &Url) -> Self {
        let query = url.query().unwrap_or_default().replace('+', "%2B");
        Self::from_params(form_urlencoded::parse(query.as_bytes()))
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
            && self.url.is_none()
            && self.text.is_none()
            && self.file_path.is_none()
    }

    /// Render the context as a system message for the agent
    pub fn to_system_prompt(&self) -> Option<String> {
        let mut parts = Vec::new();

        if let Some(session_id) = &self.session_id {
            parts.push(format!("Continue Claude Code session: {}", session_id));
        }
        if let Some(url) = &self.url {
            parts.push(format!("Discuss this URL: {}", url));
        }
        if let Some(text) = &self.text {
            parts.push(format!("Context: {}", text));
        }
        if let Some(file_path) = &self.file_path {
            parts.push(format!("Discuss file: {}", file_path));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// Whether `value` is an absolute URL or a scheme-less link
fn is_link(value: &str) -> bool {
    match Url::parse(value) {
        Ok(_) => true,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("https://{}", value)).is_ok()
        }
        Err(_) => false,
    }
}

/// Errors for activation URLs that cannot be handled
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("invalid activation URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported activation target: {0}")]
    UnsupportedHost(String),
}

/// A parsed `<scheme>://activate?...` request
#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub context: ActivationContext,
}

impl ActivationRequest {
    /// Parse an activation URL, rejecting any host other than `activate`
    pub fn parse(raw: &str) -> Result<Self, ActivationError> {
        let url = Url::parse(raw)?;
        match url.host_str() {
            Some(ACTIVATE_HOST) => Ok(Self {
                context: ActivationContext::from_url(&url),
            }),
            other => Err(ActivationError::UnsupportedHost(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}
