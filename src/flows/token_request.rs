//! Token Endpoint Requests
//!
//! Client authentication and response parsing shared by the code exchange and refresh grant.

use base64::Engine;
use secrecy::ExposeSecret;

use crate::core::{HttpRequest, HttpTransport};
use crate::error::{create_error_from_response, CredentialError, ProtocolError};
use crate::types::{ClientAuthMethod, ClientIdentity, TokenResponse};

/// Build a token endpoint POST carrying the client's credentials per its `auth_method`.
pub(crate) fn build_token_request(client: &ClientIdentity, grant: &[(&str, &str)]) -> HttpRequest {
    let mut params: Vec<(&str, &str)> = grant.to_vec();
    params.push(("client_id", client.client_id.as_str()));

    let secret = client.client_secret.as_ref().map(|s| s.expose_secret().as_str());
    if client.auth_method == ClientAuthMethod::ClientSecretPost {
        if let Some(secret) = secret {
            params.push(("client_secret", secret));
        }
    }

    let request = HttpRequest::form_post(&client.token_uri, &params);

    match (client.auth_method, secret) {
        (ClientAuthMethod::ClientSecretBasic, Some(secret)) => {
            let credentials = format!("{}:{}", client.client_id, secret);
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
            request.with_header("authorization", format!("Basic {}", encoded))
        }
        _ => request,
    }
}

/// Send a token request and parse the success body.
pub(crate) async fn send_token_request(
    transport: &dyn HttpTransport,
    request: HttpRequest,
) -> Result<TokenResponse, CredentialError> {
    let response = transport.send(request).await?;

    if !response.is_success() {
        return Err(create_error_from_response(response.status, &response.body));
    }

    serde_json::from_str(&response.body).map_err(|e| {
        ProtocolError::InvalidJson {
            message: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MockHttpTransport;
    use crate::error::ProviderError;

    fn client(method: ClientAuthMethod) -> ClientIdentity {
        ClientIdentity::new("cid", Some("csecret".to_string()))
            .with_endpoints("https://auth.example.com", "https://token.example.com")
            .with_auth_method(method)
    }

    #[test]
    fn test_secret_post_puts_secret_in_body() {
        let request = build_token_request(
            &client(ClientAuthMethod::ClientSecretPost),
            &[("grant_type", "refresh_token")],
        );
        let params = request.form_params();
        assert_eq!(params["client_id"], "cid");
        assert_eq!(params["client_secret"], "csecret");
        assert!(!request.headers.contains_key("authorization"));
        assert_eq!(request.url, "https://token.example.com");
    }

    #[test]
    fn test_secret_basic_uses_header() {
        let request = build_token_request(
            &client(ClientAuthMethod::ClientSecretBasic),
            &[("grant_type", "refresh_token")],
        );
        assert!(!request.form_params().contains_key("client_secret"));
        // base64("cid:csecret")
        assert_eq!(request.headers["authorization"], "Basic Y2lkOmNzZWNyZXQ=");
    }

    #[tokio::test]
    async fn test_error_body_maps_to_provider_error() {
        let transport = MockHttpTransport::new();
        transport.queue_json_response(
            400,
            &serde_json::json!({"error": "invalid_grant", "error_description": "Bad Request"}),
        );
        transport.queue_response(200, "not json");

        let request = build_token_request(&client(ClientAuthMethod::None), &[]);
        let err = send_token_request(&transport, request.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Provider(ProviderError::InvalidGrant { .. })
        ));

        let err = send_token_request(&transport, request).await.unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Protocol(ProtocolError::InvalidJson { .. })
        ));
    }
}
