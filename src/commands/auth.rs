use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::api::auth::authenticate;
use crate::api::client::{AuthClient, RequestExecutor};
use crate::config::Config;
use crate::credentials::{Credentials, SessionStore};
use crate::models::auth::AuthProvider;
use crate::ui::Ui;

pub async fn login(
    config: &Config,
    username: &str,
    api_key: Option<&str>,
    password: Option<&str>,
    ui: &dyn Ui,
) -> Result<()> {
    let provider = match (api_key, password) {
        (Some(api_key), _) => AuthProvider::ApiKey {
            username: username.to_string(),
            api_key: api_key.to_string(),
        },
        (None, Some(password)) => AuthProvider::UsernamePassword {
            username: username.to_string(),
            password: password.to_string(),
        },
        (None, None) => bail!("Either --api-key or --password is required"),
    };

    let store = config.session_store();
    let executor = config.executor()?;
    log_in(&executor, &config.base_url, &provider, store.as_ref()).await?;

    ui.info(&format!("Logged in as {}", provider.username()));
    Ok(())
}

async fn log_in<E: RequestExecutor>(
    executor: &E,
    base_url: &str,
    provider: &AuthProvider,
    store: &dyn SessionStore,
) -> Result<Credentials> {
    provider.validate()?;

    let auth = authenticate(executor, base_url, provider)
        .await
        .context("Failed to log in")?;

    let credentials = Credentials {
        username: provider.username().to_string(),
        api_key: match provider {
            AuthProvider::ApiKey { api_key, .. } => api_key.clone(),
            AuthProvider::UsernamePassword { .. } => String::new(),
        },
        access_token: auth.access_token,
        refresh_token: auth.refresh_token.unwrap_or_default(),
    };
    store
        .save(&credentials)
        .context("Failed to store session")?;

    Ok(credentials)
}

pub async fn logout(config: &Config, ui: &dyn Ui) -> Result<()> {
    let store = config.session_store();
    let credentials = store.load()?;

    if credentials.logged_in() {
        let client = AuthClient::new(&config.base_url, config.executor()?, credentials, store.clone());
        log_out(&client, store.as_ref()).await?;
    } else {
        store.clear()?;
    }

    ui.info("Logged out");
    Ok(())
}

/// Revoke the session server-side when possible, then forget it locally.
async fn log_out<E: RequestExecutor>(client: &AuthClient<E>, store: &dyn SessionStore) -> Result<()> {
    if let Err(err) = client.revoke_session().await {
        warn!(error = %err, "failed to revoke session, clearing local credentials anyway");
    }
    store.clear().context("Failed to clear stored session")
}

pub fn whoami(config: &Config, ui: &dyn Ui) -> Result<()> {
    let credentials = config.session_store().load()?;
    ui.info(&describe(&credentials));
    Ok(())
}

fn describe(credentials: &Credentials) -> String {
    if !credentials.logged_in() {
        return "Not logged in".to_string();
    }
    if credentials.api_key.is_empty() {
        return credentials.username.clone();
    }
    format!("{} {}", credentials.username, credentials.redacted_api_key())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::{describe, log_in, log_out};
    use crate::api::client::HttpExecutor;
    use crate::api::client::tests::client_for;
    use crate::credentials::{Credentials, MemoryStore, SessionStore};
    use crate::models::auth::AuthProvider;

    #[tokio::test]
    async fn login_stores_session() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/auth/providers/local-userpass/login");
            then.status(200).json_body(json!({
                "access_token": "access",
                "refresh_token": "refresh"
            }));
        });

        let store = MemoryStore::default();
        let executor = HttpExecutor::new(Duration::from_secs(5)).expect("executor");
        let provider = AuthProvider::UsernamePassword {
            username: "ana@example.com".to_string(),
            password: "secret".to_string(),
        };

        log_in(&executor, &server.base_url(), &provider, &store)
            .await
            .expect("login");

        let stored = store.snapshot();
        assert_eq!(stored.username, "ana@example.com");
        assert_eq!(stored.access_token, "access");
        assert_eq!(stored.refresh_token, "refresh");
        assert!(stored.api_key.is_empty());
    }

    #[tokio::test]
    async fn invalid_api_key_is_rejected_locally() {
        let server = MockServer::start_async().await;
        let login = server.mock(|when, then| {
            when.method(POST).path("/auth/providers/mongodb-cloud/login");
            then.status(200);
        });

        let store = MemoryStore::default();
        let executor = HttpExecutor::new(Duration::from_secs(5)).expect("executor");
        let provider = AuthProvider::ApiKey {
            username: "public".to_string(),
            api_key: "nodashes".to_string(),
        };

        let err = log_in(&executor, &server.base_url(), &provider, &store)
            .await
            .expect_err("invalid key");

        assert!(err.to_string().contains("invalid API key"));
        login.assert_calls(0);
        assert!(!store.snapshot().logged_in());
    }

    #[tokio::test]
    async fn logout_clears_even_when_revoke_fails() {
        let server = MockServer::start_async().await;
        let revoke = server.mock(|when, then| {
            when.method(DELETE).path("/auth/session");
            then.status(500);
        });

        let (client, store) = client_for(&server, "access", "refresh");
        log_out(&client, store.as_ref()).await.expect("logout");

        revoke.assert_calls(1);
        let cleared = store.load().expect("load");
        assert!(!cleared.logged_in());
        assert!(cleared.refresh_token.is_empty());
    }

    #[test]
    fn describes_login_state() {
        assert_eq!(describe(&Credentials::default()), "Not logged in");

        let credentials = Credentials {
            username: "public".to_string(),
            api_key: "1111-2222-abcd".to_string(),
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
        };
        assert_eq!(describe(&credentials), "public ****-****-abcd");
    }
}
