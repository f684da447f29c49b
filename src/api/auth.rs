use reqwest::{Method, StatusCode};
use tracing::debug;

use crate::api::client::{AUTH_SESSION_ROUTE, AuthClient, RequestExecutor, RequestOptions};
use crate::api::error::{ApiError, decode, expect_status, status_error};
use crate::models::auth::{AuthProvider, AuthResponse};

/// Log in with `provider` and return the new session tokens.
pub async fn authenticate<E: RequestExecutor>(
    executor: &E,
    base_url: &str,
    provider: &AuthProvider,
) -> Result<AuthResponse, ApiError> {
    let url = format!(
        "{}/auth/providers/{}/login",
        base_url.trim_end_matches('/'),
        provider.provider_type()
    );

    let res = executor
        .execute(
            Method::POST,
            &url,
            RequestOptions::json(&provider.payload())?,
        )
        .await?;
    let res = expect_status(res, StatusCode::OK, "failed to authenticate").await?;

    decode(res).await
}

impl<E: RequestExecutor> AuthClient<E> {
    /// Revoke the current session server-side.
    pub async fn revoke_session(&self) -> Result<(), ApiError> {
        let refresh_token = self.credentials().await.refresh_token;
        let options = RequestOptions::default().with_bearer(&refresh_token)?;

        let res = self
            .send_raw(Method::DELETE, AUTH_SESSION_ROUTE, options)
            .await?;
        debug!(status = %res.status(), "session revoke finished");

        if res.status().is_success() {
            Ok(())
        } else {
            Err(status_error(res, "failed to log out").await)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::authenticate;
    use crate::api::client::HttpExecutor;
    use crate::api::client::tests::client_for;
    use crate::api::error::ApiError;
    use crate::models::auth::AuthProvider;

    fn api_key_provider() -> AuthProvider {
        AuthProvider::ApiKey {
            username: "public".to_string(),
            api_key: "private-key".to_string(),
        }
    }

    #[tokio::test]
    async fn login_posts_provider_payload() {
        let server = MockServer::start_async().await;
        let login = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/providers/mongodb-cloud/login")
                .json_body(json!({"username": "public", "apiKey": "private-key"}));
            then.status(200).json_body(json!({
                "access_token": "access",
                "refresh_token": "refresh"
            }));
        });

        let executor = HttpExecutor::new(Duration::from_secs(5)).expect("executor");
        let auth = authenticate(&executor, &server.base_url(), &api_key_provider())
            .await
            .expect("login");

        login.assert();
        assert_eq!(auth.access_token, "access");
        assert_eq!(auth.refresh_token.as_deref(), Some("refresh"));
    }

    #[tokio::test]
    async fn login_failure_surfaces_server_message() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/auth/providers/mongodb-cloud/login");
            then.status(401)
                .json_body(json!({"error": "invalid username/password"}));
        });

        let executor = HttpExecutor::new(Duration::from_secs(5)).expect("executor");
        let err = authenticate(&executor, &server.base_url(), &api_key_provider())
            .await
            .expect_err("login should fail");

        assert!(matches!(err, ApiError::Status { .. }));
        assert!(err.to_string().contains("invalid username/password"));
    }

    #[tokio::test]
    async fn revoke_uses_refresh_token() {
        let server = MockServer::start_async().await;
        let revoke = server.mock(|when, then| {
            when.method(DELETE)
                .path("/auth/session")
                .header("Authorization", "Bearer my.refresh.token");
            then.status(204);
        });

        let (client, _store) = client_for(&server, "access", "my.refresh.token");
        client.revoke_session().await.expect("logout");
        revoke.assert();
    }
}
