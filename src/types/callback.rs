//! Callback Types
//!
//! Parameters carried by the browser redirect back to the loopback listener.

use url::Url;

/// Callback parameters from the authorization redirect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse callback parameters from a full URL.
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "error_description" => params.error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        params
    }

    /// Parse the request target of an HTTP request line (`/callback?code=...`).
    ///
    /// Returns `None` when the target cannot be resolved against a loopback base.
    pub fn from_request_target(target: &str) -> Option<Self> {
        let base = Url::parse("http://127.0.0.1/").ok()?;
        let url = base.join(target).ok()?;
        Some(Self::from_url(&url))
    }

    /// Check if the callback reports an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Check if the callback carries a code and no error.
    pub fn is_success(&self) -> bool {
        self.code.is_some() && self.error.is_none()
    }

    /// Whether this request is an OAuth redirect at all (browsers also ask for `/favicon.ico`).
    pub fn is_oauth_redirect(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}
