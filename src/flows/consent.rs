//! Interactive Consent Flow
//!
//! Authorization code grant with PKCE over a loopback redirect, the flow
//! Google documents for installed applications.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::{
    generate_state, lock, state_matches, DefaultPkceGenerator, HttpTransport, PkceGenerator,
};
use crate::error::{AuthorizationError, ConfigurationError, CredentialError};
use crate::flows::token_request::{build_token_request, send_token_request};
use crate::types::{
    AuthorizationRequest, CallbackParams, ClientIdentity, CredentialRecord, PkceMethod, Prompt,
    ScopeSet, TokenResponse, DEFAULT_IDENTITY,
};

const MAX_REQUEST_BYTES: usize = 8192;
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_HTML: &str = "<html><body><h1>Authentication successful</h1>\
<p>You may close this window and return to the application.</p></body></html>";
const ERROR_HTML: &str = "<html><body><h1>Authentication failed</h1>\
<p>You may close this window and try again from the application.</p></body></html>";

/// Interactive consent interface (for dependency injection).
#[async_trait]
pub trait AuthorizationFlowProvider: Send + Sync {
    /// Run a full user consent for `scopes` and return the issued record.
    ///
    /// Blocks until the user finishes in the browser, the flow fails, or the
    /// configured callback timeout elapses.
    async fn run_interactive_consent(
        &self,
        client: &ClientIdentity,
        scopes: &ScopeSet,
        identity: &str,
    ) -> Result<CredentialRecord, CredentialError>;
}

/// Opens URLs in the user's browser.
#[cfg_attr(test, mockall::automock)]
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), CredentialError>;
}

/// Launches the platform's default browser.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), CredentialError> {
        let mut command = browser_command(url).ok_or_else(|| {
            AuthorizationError::BrowserLaunchFailed {
                message: "opening a browser is unsupported on this platform".to_string(),
            }
        })?;

        command
            .spawn()
            .map(|_| ())
            .map_err(|e| {
                AuthorizationError::BrowserLaunchFailed {
                    message: e.to_string(),
                }
                .into()
            })
    }
}

fn browser_command(url: &str) -> Option<Command> {
    if cfg!(target_os = "windows") {
        let mut command = Command::new("rundll32.exe");
        command.arg("url.dll,FileProtocolHandler").arg(url);
        Some(command)
    } else if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(url);
        Some(command)
    } else if cfg!(unix) {
        let mut command = Command::new("xdg-open");
        command.arg(url);
        Some(command)
    } else {
        None
    }
}

/// Loopback-redirect consent flow.
pub struct LoopbackConsentFlow {
    transport: Arc<dyn HttpTransport>,
    browser: Arc<dyn BrowserLauncher>,
    pkce: Arc<dyn PkceGenerator>,
    callback_timeout: Option<Duration>,
    port: u16,
}

impl LoopbackConsentFlow {
    pub fn new(transport: Arc<dyn HttpTransport>, browser: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            transport,
            browser,
            pkce: Arc::new(DefaultPkceGenerator::new()),
            callback_timeout: None,
            port: 0,
        }
    }

    /// Give up waiting for the browser redirect after `timeout`.
    pub fn with_callback_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Listen on a fixed port instead of an ephemeral one.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_pkce_generator(mut self, pkce: Arc<dyn PkceGenerator>) -> Self {
        self.pkce = pkce;
        self
    }

    /// Build the authorization URL for one attempt.
    pub fn build_authorization_request(
        &self,
        client: &ClientIdentity,
        scopes: &ScopeSet,
        identity: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest, CredentialError> {
        let mut url = Url::parse(&client.auth_uri).map_err(|_| {
            ConfigurationError::InvalidEndpoint {
                url: client.auth_uri.clone(),
            }
        })?;

        let state = generate_state();
        let pkce = self.pkce.generate(PkceMethod::S256);

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &client.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("scope", &scopes.to_scope_string())
                .append_pair("state", &state)
                .append_pair("code_challenge", &pkce.code_challenge)
                .append_pair("code_challenge_method", pkce.code_challenge_method.as_str())
                .append_pair("access_type", "offline")
                .append_pair("prompt", Prompt::Consent.as_str())
                .append_pair("include_granted_scopes", "true");
            if identity != DEFAULT_IDENTITY && identity.contains('@') {
                query.append_pair("login_hint", identity);
            }
        }

        Ok(AuthorizationRequest {
            url: url.into(),
            state,
            redirect_uri: redirect_uri.to_string(),
            pkce,
        })
    }

    async fn exchange_code(
        &self,
        client: &ClientIdentity,
        code: &str,
        request: &AuthorizationRequest,
    ) -> Result<TokenResponse, CredentialError> {
        let http_request = build_token_request(
            client,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", request.redirect_uri.as_str()),
                ("code_verifier", request.pkce.verifier()),
            ],
        );
        send_token_request(self.transport.as_ref(), http_request).await
    }

    async fn await_code(
        &self,
        listener: &TcpListener,
        expected_state: &str,
    ) -> Result<String, CredentialError> {
        match self.callback_timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait_for_callback(listener, expected_state))
                .await
                .map_err(|_| AuthorizationError::CallbackTimeout { timeout })?,
            None => wait_for_callback(listener, expected_state).await,
        }
    }
}

#[async_trait]
impl AuthorizationFlowProvider for LoopbackConsentFlow {
    async fn run_interactive_consent(
        &self,
        client: &ClientIdentity,
        scopes: &ScopeSet,
        identity: &str,
    ) -> Result<CredentialRecord, CredentialError> {
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(callback_failed)?;
        let port = listener.local_addr().map_err(callback_failed)?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");

        let request = self.build_authorization_request(client, scopes, identity, &redirect_uri)?;

        info!(port, scopes = %scopes, "Opening browser for consent");
        self.browser.open(&request.url)?;

        let code = self.await_code(&listener, &request.state).await?;
        drop(listener);

        let response = self
            .exchange_code(client, &code, &request)
            .await
            .map_err(exchange_failed)?;

        CredentialRecord::from_token_response(&response, &client.client_id, scopes, Utc::now())
            .map_err(exchange_failed)
    }
}

/// Accept connections until one carries the OAuth redirect.
///
/// Each connection is served on its own task, so an idle preconnect from
/// the browser cannot hold up the real redirect.
async fn wait_for_callback(
    listener: &TcpListener,
    expected_state: &str,
) -> Result<String, CredentialError> {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted.map_err(callback_failed)?;
                connections.spawn(serve_connection(socket, peer, expected_state.to_string()));
            }
            Some(served) = connections.join_next() => {
                if let Ok(Some(result)) = served {
                    return result;
                }
            }
        }
    }
}

/// Serve one loopback connection. `None` means it was not the redirect.
async fn serve_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    expected_state: String,
) -> Option<Result<String, CredentialError>> {
    let target = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut socket)).await {
        Ok(Some(target)) => target,
        Ok(None) => {
            respond(&mut socket, "400 Bad Request", ERROR_HTML).await;
            return None;
        }
        Err(_) => {
            debug!(%peer, "Closing idle loopback connection");
            return None;
        }
    };

    let params = match CallbackParams::from_request_target(&target) {
        Some(params) if params.is_oauth_redirect() => params,
        _ => {
            debug!(%peer, "Ignoring non-callback request on loopback listener");
            respond(&mut socket, "404 Not Found", "").await;
            return None;
        }
    };

    let result = validate_callback(params, &expected_state);
    match &result {
        Ok(_) => respond(&mut socket, "200 OK", SUCCESS_HTML).await,
        Err(e) => {
            warn!(error = %e, "Authorization callback rejected");
            respond(&mut socket, "400 Bad Request", ERROR_HTML).await;
        }
    }
    Some(result)
}

fn validate_callback(params: CallbackParams, expected_state: &str) -> Result<String, CredentialError> {
    let state_ok = params
        .state
        .as_deref()
        .map(|received| state_matches(expected_state, received))
        .unwrap_or(false);
    if !state_ok {
        return Err(AuthorizationError::StateMismatch.into());
    }

    match (params.error, params.code) {
        (Some(error), _) if error == "access_denied" => Err(AuthorizationError::AccessDenied {
            error_description: params.error_description,
        }
        .into()),
        (Some(error), _) => Err(AuthorizationError::CallbackFailed {
            message: match params.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            },
        }
        .into()),
        (None, Some(code)) if !code.is_empty() => Ok(code),
        (None, _) => Err(AuthorizationError::CallbackFailed {
            message: "callback is missing the authorization code".to_string(),
        }
        .into()),
    }
}

/// Read the request head and return the target of a `GET` request line.
async fn read_request_target(socket: &mut TcpStream) -> Option<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    while buffer.len() < MAX_REQUEST_BYTES {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buffer);
    let mut parts = head.lines().next()?.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Some(target.to_string()),
        _ => None,
    }
}

async fn respond(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn callback_failed(error: std::io::Error) -> CredentialError {
    AuthorizationError::CallbackFailed {
        message: error.to_string(),
    }
    .into()
}

fn exchange_failed(error: CredentialError) -> CredentialError {
    match error {
        CredentialError::AuthenticationFailed(_) | CredentialError::ConfigurationMissing(_) => error,
        other => AuthorizationError::CodeExchangeFailed {
            message: other.to_string(),
        }
        .into(),
    }
}

/// Mock consent flow for testing.
///
/// Issues a record granting exactly the requested scopes unless told otherwise.
pub struct MockAuthorizationFlow {
    history: Mutex<Vec<(ScopeSet, String)>>,
    errors: Mutex<VecDeque<CredentialError>>,
    granted_override: Mutex<Option<ScopeSet>>,
    delay: Option<Duration>,
    lifetime: chrono::Duration,
    issue_refresh_token: bool,
}

impl Default for MockAuthorizationFlow {
    fn default() -> Self {
        Self {
            history: Mutex::new(Vec::new()),
            errors: Mutex::new(VecDeque::new()),
            granted_override: Mutex::new(None),
            delay: None,
            lifetime: chrono::Duration::hours(1),
            issue_refresh_token: true,
        }
    }
}

impl MockAuthorizationFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the time a user spends in the browser.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn without_refresh_token(mut self) -> Self {
        self.issue_refresh_token = false;
        self
    }

    /// Fail the next consent with `error`.
    pub fn fail_next(&self, error: CredentialError) -> &Self {
        lock(&self.errors).push_back(error);
        self
    }

    /// Grant `scopes` instead of the requested set on every later consent.
    pub fn grant_only(&self, scopes: ScopeSet) -> &Self {
        *lock(&self.granted_override) = Some(scopes);
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.history).len()
    }

    /// `(scopes, identity)` of every consent run, oldest first.
    pub fn get_history(&self) -> Vec<(ScopeSet, String)> {
        lock(&self.history).clone()
    }
}

#[async_trait]
impl AuthorizationFlowProvider for MockAuthorizationFlow {
    async fn run_interactive_consent(
        &self,
        client: &ClientIdentity,
        scopes: &ScopeSet,
        identity: &str,
    ) -> Result<CredentialRecord, CredentialError> {
        lock(&self.history).push((scopes.clone(), identity.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = lock(&self.errors).pop_front() {
            return Err(error);
        }

        let granted = lock(&self.granted_override)
            .clone()
            .unwrap_or_else(|| scopes.clone());
        let n = rand::random::<u32>();
        let response = TokenResponse {
            access_token: format!("mock-access-{n}"),
            token_type: "Bearer".to_string(),
            expires_in: u64::try_from(self.lifetime.num_seconds().max(0)).ok(),
            refresh_token: self
                .issue_refresh_token
                .then(|| format!("mock-refresh-{n}")),
            scope: Some(granted.to_scope_string()),
            id_token: None,
            extra: Default::default(),
        };

        CredentialRecord::from_token_response(&response, &client.client_id, scopes, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReqwestHttpTransport;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(token_uri: &str) -> ClientIdentity {
        ClientIdentity::new("cid.apps.googleusercontent.com", Some("secret".to_string()))
            .with_endpoints("https://accounts.google.com/o/oauth2/auth", token_uri)
    }

    fn upload_scopes() -> ScopeSet {
        ScopeSet::new(["https://www.googleapis.com/auth/youtube.upload"]).unwrap()
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    fn flow_with_browser(browser: MockBrowserLauncher) -> LoopbackConsentFlow {
        LoopbackConsentFlow::new(
            Arc::new(ReqwestHttpTransport::new().unwrap()),
            Arc::new(browser),
        )
    }

    /// Browser double that hands the opened URL to the test.
    fn capturing_browser() -> (MockBrowserLauncher, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut browser = MockBrowserLauncher::new();
        browser.expect_open().times(1).returning(move |url| {
            let _ = tx.send(url.to_string());
            Ok(())
        });
        (browser, rx)
    }

    #[test]
    fn test_authorization_url_parameters() {
        let flow = flow_with_browser(MockBrowserLauncher::new());
        let request = flow
            .build_authorization_request(
                &client("https://oauth2.googleapis.com/token"),
                &upload_scopes(),
                "creator@example.com",
                "http://127.0.0.1:8080/",
            )
            .unwrap();

        let params = query(&request.url);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "cid.apps.googleusercontent.com");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8080/");
        assert_eq!(params["scope"], "https://www.googleapis.com/auth/youtube.upload");
        assert_eq!(params["state"], request.state);
        assert_eq!(params["code_challenge"], request.pkce.code_challenge);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["login_hint"], "creator@example.com");
    }

    #[test]
    fn test_default_identity_has_no_login_hint() {
        let flow = flow_with_browser(MockBrowserLauncher::new());
        let request = flow
            .build_authorization_request(
                &client("https://oauth2.googleapis.com/token"),
                &upload_scopes(),
                DEFAULT_IDENTITY,
                "http://127.0.0.1:8080/",
            )
            .unwrap();
        assert!(!query(&request.url).contains_key("login_hint"));
    }

    #[test]
    fn test_validate_callback() {
        let ok = CallbackParams {
            code: Some("4/0Ab".to_string()),
            state: Some("s1".to_string()),
            ..Default::default()
        };
        assert_eq!(validate_callback(ok.clone(), "s1").unwrap(), "4/0Ab");
        assert!(matches!(
            validate_callback(ok, "s2"),
            Err(CredentialError::AuthenticationFailed(AuthorizationError::StateMismatch))
        ));

        let denied = CallbackParams {
            state: Some("s1".to_string()),
            error: Some("access_denied".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            validate_callback(denied, "s1"),
            Err(CredentialError::AuthenticationFailed(AuthorizationError::AccessDenied { .. }))
        ));
    }

    #[tokio::test]
    async fn test_browser_failure_is_authentication_failure() {
        let mut browser = MockBrowserLauncher::new();
        browser.expect_open().returning(|_| {
            Err(AuthorizationError::BrowserLaunchFailed {
                message: "no display".to_string(),
            }
            .into())
        });

        let err = flow_with_browser(browser)
            .run_interactive_consent(&client("http://127.0.0.1:9/token"), &upload_scopes(), "default")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::AuthenticationFailed(AuthorizationError::BrowserLaunchFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_callback_timeout() {
        let (browser, _rx) = capturing_browser();
        let flow = flow_with_browser(browser).with_callback_timeout(Some(Duration::from_millis(50)));

        let err = flow
            .run_interactive_consent(&client("http://127.0.0.1:9/token"), &upload_scopes(), "default")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::AuthenticationFailed(AuthorizationError::CallbackTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_loopback_flow_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=4%2F0Ab-test"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.issued",
                "expires_in": 3599,
                "refresh_token": "1//refresh",
                "scope": "https://www.googleapis.com/auth/youtube.upload",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (browser, mut rx) = capturing_browser();
        let flow = Arc::new(flow_with_browser(browser));
        let client = client(&format!("{}/token", server.uri()));

        let handle = {
            let flow = flow.clone();
            let client = client.clone();
            tokio::spawn(async move {
                flow.run_interactive_consent(&client, &upload_scopes(), "default")
                    .await
            })
        };

        let auth_url = rx.recv().await.unwrap();
        let params = query(&auth_url);
        let redirect_uri = params["redirect_uri"].clone();
        assert!(redirect_uri.starts_with("http://127.0.0.1:"));

        let http = reqwest::Client::builder().no_proxy().build().unwrap();

        let favicon = http
            .get(format!("{redirect_uri}favicon.ico"))
            .send()
            .await
            .unwrap();
        assert_eq!(favicon.status().as_u16(), 404);

        let callback = http
            .get(&redirect_uri)
            .query(&[("code", "4/0Ab-test"), ("state", params["state"].as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(callback.status().as_u16(), 200);
        assert!(callback.text().await.unwrap().contains("Authentication successful"));

        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.access_token(), "ya29.issued");
        assert!(record.has_refresh_token());
        assert_eq!(record.scopes, upload_scopes());
        assert_eq!(record.client_id, "cid.apps.googleusercontent.com");
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_callback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.issued",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (browser, mut rx) = capturing_browser();
        let flow = Arc::new(
            flow_with_browser(browser).with_callback_timeout(Some(Duration::from_secs(3))),
        );
        let client = client(&format!("{}/token", server.uri()));

        let handle = {
            let flow = flow.clone();
            tokio::spawn(async move {
                flow.run_interactive_consent(&client, &upload_scopes(), "default")
                    .await
            })
        };

        let params = query(&rx.recv().await.unwrap());
        let redirect_uri = Url::parse(&params["redirect_uri"]).unwrap();
        let port = redirect_uri.port().unwrap();

        // Connected but silent, like a browser preconnect.
        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let callback = http
            .get(redirect_uri.as_str())
            .query(&[("code", "4/0Ab-test"), ("state", params["state"].as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(callback.status().as_u16(), 200);

        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.access_token(), "ya29.issued");
    }

    #[tokio::test]
    async fn test_mock_flow_records_calls() {
        let flow = MockAuthorizationFlow::new().without_refresh_token();
        let record = flow
            .run_interactive_consent(&client("http://unused"), &upload_scopes(), "a@b.c")
            .await
            .unwrap();

        assert!(!record.has_refresh_token());
        assert_eq!(flow.get_history(), vec![(upload_scopes(), "a@b.c".to_string())]);
    }
}
