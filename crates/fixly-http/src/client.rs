//! Authenticated request pipeline.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, trace, warn};

use fixly_core::{ApiError, ClientConfig, Error, KeyValueStorage};

use crate::credential_store::CredentialStore;
use crate::normalize::{self, CODE_INVALID_REQUEST};
use crate::refresh::RefreshCoordinator;

/// Client for the Fixly API.
///
/// Every request goes through [`ApiClient::send`], which attaches the stored
/// credential, and on a 401 renews it and replays the request once. Cloning
/// is cheap; clones share the credential store and the renewal state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    store: Arc<CredentialStore>,
    refresher: RefreshCoordinator,
}

/// Which try of a logical request this is. Local to one `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Original,
    Retry,
}

impl ApiClient {
    /// Create a client whose credentials live in `storage`.
    pub fn new(config: ClientConfig, storage: Arc<dyn KeyValueStorage>) -> Result<Self, Error> {
        Self::with_store(config, Arc::new(CredentialStore::new(storage)))
    }

    /// Create a client around an existing credential store.
    pub fn with_store(config: ClientConfig, store: Arc<CredentialStore>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("fixly/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let config = Arc::new(config);
        let refresher = RefreshCoordinator::new(http.clone(), Arc::clone(&config), Arc::clone(&store));

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                config,
                store,
                refresher,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The credential store backing this client.
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// Renew the credential now, regardless of whether a request failed.
    pub async fn refresh_credentials(&self) -> Result<String, ApiError> {
        self.inner.refresher.renew(None).await
    }

    /// Send a request.
    ///
    /// Login requests are sent as-is. Anything else carries the stored
    /// `Authorization` header when there is one. A 401 triggers one renewal
    /// and one replay; a 401 on the replay ends the session. If renewal
    /// fails the caller gets a 401 `SESSION_EXPIRED` error (see
    /// [`ApiError::is_session_expired`]).
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if self.inner.config.is_login_path(&request.path) {
            return self.dispatch(&request, None).await;
        }

        let mut attempt = Attempt::Original;
        loop {
            let header = self.inner.store.auth_header().await;
            let result = self.dispatch(&request, header.as_deref()).await;

            match (result, attempt) {
                (Err(err), Attempt::Original) if err.is_unauthorized() => {
                    debug!("Request rejected as unauthorized, renewing credentials");
                    attempt = Attempt::Retry;
                    self.inner.refresher.renew(header.as_deref()).await?;
                }
                (Err(err), Attempt::Retry) if err.is_unauthorized() => {
                    warn!("Request rejected again after renewal, ending session");
                    self.inner.store.clear().await;
                    return Err(err);
                }
                (result, _) => return result,
            }
        }
    }

    /// One HTTP exchange with no recovery.
    pub(crate) async fn dispatch(
        &self,
        request: &ApiRequest,
        authorization: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.inner.config.url_for(&request.path);
        trace!(%url, authenticated = authorization.is_some(), "Dispatching request");

        let mut builder = self.inner.http.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Bytes { data, content_type } => {
                let builder = builder.body(data.clone());
                match content_type {
                    Some(content_type) => builder.header(CONTENT_TYPE, content_type.as_str()),
                    None => builder,
                }
            }
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| normalize::from_transport(&e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| normalize::from_transport(&e))?;
        trace!(status, len = body.len(), "Response received");

        if (200..300).contains(&status) {
            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        } else {
            Err(normalize::from_response(status, &body))
        }
    }

    /// Send a request and decode the JSON response.
    pub async fn send_json<R: DeserializeOwned>(&self, request: ApiRequest) -> Result<R, ApiError> {
        self.send(request).await?.json()
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn get_with_query<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R, ApiError> {
        let request = query
            .iter()
            .fold(ApiRequest::get(path), |request, (key, value)| request.query(*key, *value));
        self.send_json(request).await
    }

    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send_json(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        self.send_json(ApiRequest::delete(path)).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url)
            .field("store", &self.inner.store)
            .field("refresher", &self.inner.refresher)
            .finish()
    }
}

/// A request that can be replayed exactly.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured API prefix.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Use `body` serialized as JSON.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| {
            ApiError::new(format!("request body could not be serialized: {}", e))
                .with_code(CODE_INVALID_REQUEST)
        })?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn json_value(mut self, value: Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    /// Use a raw body. Without a `content_type` none is set.
    pub fn bytes(mut self, data: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        self.body = RequestBody::Bytes {
            data: data.into(),
            content_type: content_type.map(str::to_string),
        };
        self
    }

    pub fn multipart(mut self, form: MultipartBody) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }
}

/// Request payload.
#[derive(Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
    Multipart(MultipartBody),
}

// Bodies may carry passwords; only their shape is printed.
impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Json(_) => f.write_str("Json(..)"),
            RequestBody::Bytes { data, content_type } => f
                .debug_struct("Bytes")
                .field("len", &data.len())
                .field("content_type", content_type)
                .finish(),
            RequestBody::Multipart(form) => f
                .debug_struct("Multipart")
                .field("parts", &form.parts.len())
                .finish(),
        }
    }
}

/// A multipart form kept in a replayable shape.
///
/// `reqwest`'s form is consumed when sent, so it is rebuilt from these parts
/// for every attempt. The boundary and content type are chosen by `reqwest`.
#[derive(Clone, Default)]
pub struct MultipartBody {
    parts: Vec<(String, FormPart)>,
}

#[derive(Clone)]
enum FormPart {
    Text(String),
    File {
        data: Bytes,
        file_name: Option<String>,
        mime: Option<String>,
    },
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push((name.into(), FormPart::Text(value.into())));
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        data: impl Into<Bytes>,
        file_name: Option<&str>,
        mime: Option<&str>,
    ) -> Self {
        self.parts.push((
            name.into(),
            FormPart::File {
                data: data.into(),
                file_name: file_name.map(str::to_string),
                mime: mime.map(str::to_string),
            },
        ));
        self
    }

    fn to_form(&self) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for (name, part) in &self.parts {
            form = match part {
                FormPart::Text(value) => form.text(name.clone(), value.clone()),
                FormPart::File {
                    data,
                    file_name,
                    mime,
                } => {
                    let mut part = Part::bytes(data.to_vec());
                    if let Some(file_name) = file_name {
                        part = part.file_name(file_name.clone());
                    }
                    if let Some(mime) = mime {
                        part = part.mime_str(mime).map_err(|e| {
                            ApiError::new(format!("invalid content type '{}': {}", mime, e))
                                .with_code(CODE_INVALID_REQUEST)
                        })?;
                    }
                    form.part(name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

/// A successful response, passed through unchanged.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    /// Decode the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body: &[u8] = if self.body.is_empty() { b"null" } else { &self.body };
        serde_json::from_slice(body).map_err(|e| normalize::from_decode(self.status, &e))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
