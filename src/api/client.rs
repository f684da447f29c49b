use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::bytes::Bytes;
use tracing::{debug, warn};

use crate::api::error::{ApiError, decode};
use crate::api::multipart::MultipartFile;
use crate::credentials::{Credentials, SessionStore};
use crate::models::auth::{AuthResponse, token_known_expired};

pub const DEFAULT_BASE_URL: &str = "https://realm.mongodb.com/api/admin/v3.0";

pub(crate) const AUTH_SESSION_ROUTE: &str = "/auth/session";

/// Bound on establishing a connection. The overall request timeout is set
/// separately and has to cover streaming a whole asset.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers, query string and body for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

/// A request body that can be sent more than once.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Multipart(MultipartFile),
}

impl RequestOptions {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            headers,
            query: Vec::new(),
            body: RequestBody::Bytes(Bytes::from(serde_json::to_vec(value)?)),
        })
    }

    pub fn multipart(upload: MultipartFile) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(&upload.content_type())?);
        Ok(Self {
            headers,
            query: Vec::new(),
            body: RequestBody::Multipart(upload),
        })
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_bearer(mut self, token: &str) -> Result<Self, ApiError> {
        self.headers.insert(AUTHORIZATION, bearer(token)?);
        Ok(self)
    }
}

fn bearer(token: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Sends a single HTTP request. Implementations never retry.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, ApiError>;
}

pub struct HttpExecutor {
    http: Client,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, ApiError> {
        let RequestOptions {
            headers,
            query,
            body,
        } = options;

        let body = match body {
            RequestBody::Empty => None,
            RequestBody::Bytes(bytes) => Some(reqwest::Body::from(bytes)),
            RequestBody::Multipart(upload) => {
                debug!(file = %upload.path().display(), "streaming multipart upload");
                Some(upload.into_body().await?)
            }
        };

        let mut request = self.http.request(method, url).headers(headers);
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }
}

/// An executor decorator that authenticates every request with the session's
/// access token and transparently refreshes it once on a 401.
///
/// Safe to share between tasks: token reads go through a `RwLock` and
/// refreshes are serialized so concurrent 401s trigger a single refresh.
pub struct AuthClient<E = HttpExecutor> {
    base_url: String,
    executor: E,
    credentials: RwLock<Credentials>,
    refresh_lock: Mutex<()>,
    store: Arc<dyn SessionStore>,
}

impl<E: RequestExecutor> AuthClient<E> {
    pub fn new(
        base_url: &str,
        executor: E,
        credentials: Credentials,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            executor,
            credentials: RwLock::new(credentials),
            refresh_lock: Mutex::new(()),
            store,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn credentials(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    /// Send through the inner executor as-is: no access token, no retry.
    pub(crate) async fn send_raw(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response, ApiError> {
        self.executor.execute(method, &self.url(path), options).await
    }

    /// GET an absolute URL without the session token, e.g. a hosted asset.
    pub(crate) async fn fetch(&self, url: &str) -> Result<Response, ApiError> {
        self.executor
            .execute(Method::GET, url, RequestOptions::default())
            .await
    }

    /// Issue `method path` with the current access token, refreshing the
    /// session and retrying once if the server answers 401.
    ///
    /// At most one refresh happens per call. Any response other than 401 is
    /// returned untouched, as is a 401 on the retried request or on a request
    /// sent right after an expired token was refreshed.
    pub async fn execute_request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        let mut token = self.credentials.read().await.access_token.clone();
        let mut refreshed = false;

        if token_known_expired(&token) {
            debug!(path, "access token expired, refreshing before request");
            token = self.refresh_session(&token).await?;
            refreshed = true;
        }

        let res = self
            .executor
            .execute(method.clone(), &url, options.clone().with_bearer(&token)?)
            .await?;

        if res.status() != StatusCode::UNAUTHORIZED || refreshed {
            return Ok(res);
        }
        drop(res);

        debug!(%method, path, "access token rejected, refreshing session");
        let token = self.refresh_session(&token).await?;

        self.executor
            .execute(method, &url, options.with_bearer(&token)?)
            .await
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Does not touch the stored credentials; see [`Self::execute_request`]
    /// for the path that applies and persists the result.
    pub async fn refresh_auth(&self) -> Result<AuthResponse, ApiError> {
        let refresh_token = self.credentials.read().await.refresh_token.clone();
        let options = RequestOptions::default().with_bearer(&refresh_token)?;

        let res = self
            .send_raw(Method::POST, AUTH_SESSION_ROUTE, options)
            .await?;

        if res.status() != StatusCode::CREATED {
            return Err(ApiError::RefreshFailed {
                status: res.status(),
            });
        }

        decode(res).await
    }

    /// Refresh unless another task already replaced `stale`; returns the
    /// access token to use from now on.
    async fn refresh_session(&self, stale: &str) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        {
            let current = self.credentials.read().await;
            if current.access_token != stale {
                return Ok(current.access_token.clone());
            }
        }

        let auth = self.refresh_auth().await?;

        let snapshot = {
            let mut credentials = self.credentials.write().await;
            credentials.access_token = auth.access_token.clone();
            if let Some(refresh_token) = auth.refresh_token.filter(|token| !token.is_empty()) {
                credentials.refresh_token = refresh_token;
            }
            credentials.clone()
        };

        // Keyring access is blocking; the refresh lock keeps saves in order.
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let detail = format!("{err:#}");
                warn!(error = %detail, "failed to persist refreshed session");
            }
            Err(err) => warn!(error = %err, "session persistence task failed"),
        }

        Ok(auth.access_token)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    use httpmock::prelude::*;
    use reqwest::{Method, StatusCode};
    use serde_json::json;

    use super::{AuthClient, HttpExecutor, RequestOptions};
    use crate::api::error::ApiError;
    use crate::credentials::{Credentials, MemoryStore, SessionStore};
    use crate::models::auth::jwt_with_exp;

    pub(crate) fn client_for(
        server: &MockServer,
        access_token: &str,
        refresh_token: &str,
    ) -> (AuthClient, Arc<MemoryStore>) {
        let credentials = Credentials {
            username: "user".to_string(),
            api_key: "abc-def".to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
        };
        let store = Arc::new(MemoryStore::with(credentials.clone()));
        let executor = HttpExecutor::new(Duration::from_secs(5)).expect("executor");
        let client = AuthClient::new(&server.base_url(), executor, credentials, store.clone());
        (client, store)
    }

    #[tokio::test]
    async fn refreshes_and_retries_on_unauthorized() {
        let server = MockServer::start_async().await;
        let rejected = server.mock(|when, then| {
            when.method(GET)
                .path("/groups/g/apps")
                .header("Authorization", "Bearer old.access.token");
            then.status(401);
        });
        let refresh = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/session")
                .header("Authorization", "Bearer my.refresh.token");
            then.status(201)
                .json_body(json!({"access_token": "new.access.token"}));
        });
        let accepted = server.mock(|when, then| {
            when.method(GET)
                .path("/groups/g/apps")
                .header("Authorization", "Bearer new.access.token");
            then.status(200).json_body(json!([]));
        });

        let (client, store) = client_for(&server, "old.access.token", "my.refresh.token");
        let res = client
            .execute_request(Method::GET, "/groups/g/apps", RequestOptions::default())
            .await
            .expect("request");

        assert_eq!(res.status(), StatusCode::OK);
        rejected.assert_calls(1);
        refresh.assert_calls(1);
        accepted.assert_calls(1);

        let persisted = store.snapshot();
        assert_eq!(persisted.access_token, "new.access.token");
        assert_eq!(persisted.refresh_token, "my.refresh.token");
        assert_eq!(client.credentials().await.access_token, "new.access.token");
    }

    #[tokio::test]
    async fn refresh_failure_is_returned_without_retry() {
        let server = MockServer::start_async().await;
        let rejected = server.mock(|when, then| {
            when.method(GET).path("/apps");
            then.status(401);
        });
        let refresh = server.mock(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(401);
        });

        let (client, store) = client_for(&server, "old.access.token", "expired.refresh");
        let err = client
            .execute_request(Method::GET, "/apps", RequestOptions::default())
            .await
            .expect_err("refresh should fail");

        assert!(matches!(err, ApiError::RefreshFailed { .. }));
        let message = err.to_string();
        assert!(message.contains("failed to refresh auth"), "{message}");
        assert!(message.contains("401"), "{message}");
        rejected.assert_calls(1);
        refresh.assert_calls(1);
        assert_eq!(store.snapshot().access_token, "old.access.token");
    }

    #[tokio::test]
    async fn second_unauthorized_is_passed_through() {
        let server = MockServer::start_async().await;
        let requests = server.mock(|when, then| {
            when.method(GET).path("/apps");
            then.status(401);
        });
        let refresh = server.mock(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(201)
                .json_body(json!({"access_token": "new.access.token", "refresh_token": "rotated"}));
        });

        let (client, store) = client_for(&server, "old.access.token", "my.refresh.token");
        let res = client
            .execute_request(Method::GET, "/apps", RequestOptions::default())
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        requests.assert_calls(2);
        refresh.assert_calls(1);
        assert_eq!(store.snapshot().refresh_token, "rotated");
    }

    #[tokio::test]
    async fn other_statuses_pass_through_without_refresh() {
        let server = MockServer::start_async().await;
        let failing = server.mock(|when, then| {
            when.method(DELETE)
                .path("/apps/a")
                .header("Authorization", "Bearer token");
            then.status(500);
        });
        let refresh = server.mock(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(201).json_body(json!({"access_token": "unused"}));
        });

        let (client, _store) = client_for(&server, "token", "refresh");
        let res = client
            .execute_request(Method::DELETE, "/apps/a", RequestOptions::default())
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        failing.assert_calls(1);
        refresh.assert_calls(0);
    }

    #[tokio::test]
    async fn refresh_decode_failure_propagates() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/apps");
            then.status(401);
        });
        server.mock(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(201).body("not json");
        });

        let (client, store) = client_for(&server, "old.access.token", "my.refresh.token");
        let err = client
            .execute_request(Method::GET, "/apps", RequestOptions::default())
            .await
            .expect_err("decode should fail");

        assert!(matches!(err, ApiError::Decode(_)));
        assert_eq!(store.snapshot().access_token, "old.access.token");
    }

    #[tokio::test]
    async fn concurrent_unauthorized_requests_refresh_once() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET)
                .path("/apps")
                .header("Authorization", "Bearer old.access.token");
            then.status(401).delay(Duration::from_millis(50));
        });
        let refresh = server.mock(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(201)
                .json_body(json!({"access_token": "new.access.token"}));
        });
        let accepted = server.mock(|when, then| {
            when.method(GET)
                .path("/apps")
                .header("Authorization", "Bearer new.access.token");
            then.status(200);
        });

        let (client, _store) = client_for(&server, "old.access.token", "my.refresh.token");
        let (first, second) = tokio::join!(
            client.execute_request(Method::GET, "/apps", RequestOptions::default()),
            client.execute_request(Method::GET, "/apps", RequestOptions::default()),
        );

        assert_eq!(first.expect("first").status(), StatusCode::OK);
        assert_eq!(second.expect("second").status(), StatusCode::OK);
        refresh.assert_calls(1);
        accepted.assert_calls(2);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_before_sending() {
        let server = MockServer::start_async().await;
        let expired = jwt_with_exp(1);
        let stale = server.mock(|when, then| {
            when.method(GET)
                .path("/apps")
                .header("Authorization", format!("Bearer {expired}"));
            then.status(401);
        });
        let refresh = server.mock(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(201)
                .json_body(json!({"access_token": "new.access.token"}));
        });
        let accepted = server.mock(|when, then| {
            when.method(GET)
                .path("/apps")
                .header("Authorization", "Bearer new.access.token");
            then.status(200);
        });

        let (client, _store) = client_for(&server, &expired, "my.refresh.token");
        let res = client
            .execute_request(Method::GET, "/apps", RequestOptions::default())
            .await
            .expect("request");

        assert_eq!(res.status(), StatusCode::OK);
        stale.assert_calls(0);
        refresh.assert_calls(1);
        accepted.assert_calls(1);
    }

    #[tokio::test]
    async fn json_body_is_resent_on_retry() {
        let server = MockServer::start_async().await;
        let payload = json!({"name": "secret", "value": "hunter2"});
        server.mock(|when, then| {
            when.method(POST)
                .path("/secrets")
                .header("Authorization", "Bearer old.access.token");
            then.status(401);
        });
        server.mock(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(201)
                .json_body(json!({"access_token": "new.access.token"}));
        });
        let accepted = server.mock(|when, then| {
            when.method(POST)
                .path("/secrets")
                .header("Authorization", "Bearer new.access.token")
                .json_body(payload.clone());
            then.status(201);
        });

        let (client, _store) = client_for(&server, "old.access.token", "my.refresh.token");
        let res = client
            .execute_request(
                Method::POST,
                "/secrets",
                RequestOptions::json(&payload).expect("options"),
            )
            .await
            .expect("request");

        assert_eq!(res.status(), StatusCode::CREATED);
        accepted.assert_calls(1);
    }

    #[tokio::test]
    async fn unauthorized_after_expiry_refresh_is_not_refreshed_again() {
        let server = MockServer::start_async().await;
        let expired = jwt_with_exp(1);
        let requests = server.mock(|when, then| {
            when.method(GET).path("/apps");
            then.status(401);
        });
        let refresh = server.mock(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(201)
                .json_body(json!({"access_token": "new.access.token"}));
        });

        let (client, _store) = client_for(&server, &expired, "my.refresh.token");
        let res = client
            .execute_request(Method::GET, "/apps", RequestOptions::default())
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        requests.assert_calls(1);
        refresh.assert_calls(1);
    }

    /// Blocks in `save` until the test lets it finish.
    struct GatedStore {
        inner: MemoryStore,
        saving: StdMutex<mpsc::Sender<()>>,
        release: StdMutex<mpsc::Receiver<()>>,
    }

    impl SessionStore for GatedStore {
        fn load(&self) -> anyhow::Result<Credentials> {
            self.inner.load()
        }

        fn save(&self, credentials: &Credentials) -> anyhow::Result<()> {
            self.inner.save(credentials)?;
            let _ = self.saving.lock().expect("saving").send(());
            let _ = self
                .release
                .lock()
                .expect("release")
                .recv_timeout(Duration::from_secs(5));
            Ok(())
        }

        fn clear(&self) -> anyhow::Result<()> {
            self.inner.clear()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tokens_stay_readable_while_refresh_is_persisted() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET)
                .path("/apps")
                .header("Authorization", "Bearer old.access.token");
            then.status(401);
        });
        server.mock(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(201)
                .json_body(json!({"access_token": "new.access.token"}));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/apps")
                .header("Authorization", "Bearer new.access.token");
            then.status(200);
        });

        let credentials = Credentials {
            username: "user".to_string(),
            access_token: "old.access.token".to_string(),
            refresh_token: "my.refresh.token".to_string(),
            ..Credentials::default()
        };
        let (saving_tx, saving_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: MemoryStore::with(credentials.clone()),
            saving: StdMutex::new(saving_tx),
            release: StdMutex::new(release_rx),
        });
        let executor = HttpExecutor::new(Duration::from_secs(5)).expect("executor");
        let client = Arc::new(AuthClient::new(
            &server.base_url(),
            executor,
            credentials,
            store.clone(),
        ));

        let request = tokio::spawn({
            let client = Arc::clone(&client);
            async move {
                client
                    .execute_request(Method::GET, "/apps", RequestOptions::default())
                    .await
            }
        });

        tokio::task::spawn_blocking(move || saving_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .expect("join")
            .expect("save started");
        let current = tokio::time::timeout(Duration::from_secs(1), client.credentials())
            .await
            .expect("credentials readable during save");
        assert_eq!(current.access_token, "new.access.token");

        release_tx.send(()).expect("release");
        let res = request.await.expect("join").expect("request");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(store.inner.snapshot().access_token, "new.access.token");
    }
}
