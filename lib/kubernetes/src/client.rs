use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::trace;

use super::ObjectList;
use super::config::{Auth, Config};
use super::resource::Resource;
use super::version::Version;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("build http request failed, {0}")]
    BuildRequest(http::Error),
    #[error("read http response failed, {0}")]
    ReadResponse(hyper::Error),
    #[error(transparent)]
    Http(hyper_util::client::legacy::Error),
    #[error("invalid request, {0}")]
    Validation(String),
    #[error("api server error, status: {}, reason: {}, message: {}", .0.status, .0.reason, .0.message)]
    Api(ErrorResponse),
    #[error("serialize request body failed, {0}")]
    Serialize(serde_json::Error),
    #[error("deserialize response failed, {0}")]
    Deserialize(serde_json::Error),
    #[error("read watch event failed, {0}")]
    ReadEvents(std::io::Error),
    #[error("chunk line is too large")]
    LinesCodecMaxLineLengthExceeded,
    #[error("refresh token failed, {0}")]
    RefreshToken(std::io::Error),
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        Error::ReadResponse(err)
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::BuildRequest(err)
    }
}

impl Error {
    fn api_code(&self) -> Option<u16> {
        match self {
            Error::Api(resp) => Some(resp.code),
            _ => None,
        }
    }

    /// The object does not exist, HTTP 404
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// Optimistic concurrency failure or a name clash, HTTP 409
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// A create request hit an object with the same name
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
    }
}

/// An error response from the API.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// The status
    pub status: String,
    /// A message about the error
    #[serde(default)]
    pub message: String,
    /// The reason for the error
    #[serde(default)]
    pub reason: String,
    /// The error code
    pub code: u16,
}

impl ErrorResponse {
    /// Build a response for a body which is not a `Status` object, proxies
    /// in front of the api server do that.
    fn from_status(status: StatusCode, body: &[u8]) -> Self {
        ErrorResponse {
            status: "Failure".to_string(),
            message: String::from_utf8_lossy(body).into_owned(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            code: status.as_u16(),
        }
    }
}

/// Common query parameters used in list/delete calls on collections
#[derive(Debug, Default)]
pub struct ListParams {
    /// A selector to restrict the list of returned objects by their labels.
    pub label_selector: Option<String>,

    /// A selector to restrict the list of returned objects by their fields.
    pub field_selector: Option<String>,

    /// Timeout for the list/watch call
    ///
    /// This limits the duration of the cal, regardless of any activity or inactivity.
    pub timeout: Option<u32>,

    /// Limit the number of results
    ///
    /// If there are more results, the server will respond with a continue token
    /// which can be used to fetch another page of results.
    ///
    /// See [Kubernetes API docs](https://kubernetes.io/docs/reference/using-api/api-concepts/#retrieving-large-results-sets-in-chunks)
    pub limit: Option<u32>,

    /// Fetch a second page of results.
    ///
    /// After listing results with a limit, a continue token can be used to fetch
    /// another page of results.
    pub continue_token: Option<String>,

    /// Serve data at least as new as this resourceVersion, "0" means any
    /// version the server has cached.
    ///
    /// See <https://kubernetes.io/docs/reference/using-api/api-concepts/#resource-versions> for details.
    pub resource_version: Option<String>,
}

impl ListParams {
    fn query(&self) -> String {
        let mut builder = form_urlencoded::Serializer::new(String::new());

        if let Some(field_selector) = &self.field_selector {
            builder.append_pair("fieldSelector", field_selector);
        }
        if let Some(label_selector) = &self.label_selector {
            builder.append_pair("labelSelector", label_selector);
        }
        if let Some(timeout) = &self.timeout {
            builder.append_pair("timeoutSeconds", &timeout.to_string());
        }
        if let Some(limit) = &self.limit {
            builder.append_pair("limit", &limit.to_string());
        }
        if let Some(continue_token) = &self.continue_token {
            builder.append_pair("continue", continue_token);
        } else if let Some(resource_version) = &self.resource_version {
            // When there's a continue token, we don't want to set resourceVersion
            if resource_version != "0" || self.limit.is_none() {
                builder.append_pair("resourceVersion", resource_version);
                builder.append_pair("resourceVersionMatch", "NotOlderThan");
            }
        }

        builder.finish()
    }
}

/// Common query parameters used in watch calls on collections
#[derive(Debug, Default)]
pub struct WatchParams {
    /// A selector to restrict returned objects by their labels.
    pub label_selector: Option<String>,

    /// A selector to restrict returned objects by their fields.
    pub field_selector: Option<String>,

    /// Timeout for the watch call.
    ///
    /// This limits the duration of the call, regardless of any activity or inactivity.
    /// If unset for a watch call, we will use 290s. We limit this to 295s due to
    /// [inherent watch limitations](https://github.com/kubernetes/kubernetes/issues/6513).
    pub timeout: Option<u32>,

    /// Enables watch events with type "BOOKMARK"
    ///
    /// Servers that do not implement bookmarks ignore this flag and bookmarks are sent
    /// at the server's discretion. Clients should not assume bookmarks are returned at
    /// any specific interval, nor may they assume the server will send any BOOKMARK
    /// event during a session. If this is not a watch, this field is ignored. If the
    /// feature gate WatchBookmarks is not enabled in apiserver, this field is required.
    pub bookmarks: bool,

    /// Kubernetes 1.27 Streaming Lists `sendInitialEvents=true` may be set together with
    /// `watch=true`. In that case, the watch stream will begin with synthetic events to
    /// produce the current state of objects in the collection. Once all such events have
    /// been sent, a synthetic "Bookmark" event will be sent. The bookmark will report the
    /// ResourceVersion(RV) corresponding to the set of objects, and be marked with
    /// `"k8s.io/initial-events-end": "true"` annotation. Afterwards, the watch stream
    /// will proceed as usual, sending watch events corresponding to changes (subsequent
    /// to the RV) to objects watched.
    ///
    /// When `sendInitialEvents` option is set, we require `resourceVersionMatch` option
    /// to also be set. The semantic of the watch request is as following:
    /// - `resourceVersionMatch` = NotOlderThan is interpreted as "data at least as new as
    ///   the provided `resourceVersion`" and the bookmark event is send when the state is
    ///   synced to a `resourceVersion` at least as fresh as the one provided by the
    ///   ListOptions. If `resourceVersion` is unset, this is interpreted as "consistent
    ///   read" and the bookmark event is send when the state is synced at least to the
    ///   moment when request started being processed.
    /// - `resourceVersionMatch` set to any other value or unset Invalid error is returned.
    pub send_initial_events: bool,
}

impl WatchParams {
    fn query(&self, version: &str) -> String {
        let mut builder = form_urlencoded::Serializer::new(String::new());

        builder.append_pair("resourceVersion", version);
        builder.append_pair("watch", "true");
        // https://github.com/kubernetes/kubernetes/issues/6513
        builder.append_pair(
            "timeoutSeconds",
            self.timeout.unwrap_or(290).to_string().as_str(),
        );

        if let Some(label_selector) = self.label_selector.as_ref() {
            builder.append_pair("labelSelector", label_selector);
        }
        if let Some(field_selector) = self.field_selector.as_ref() {
            builder.append_pair("fieldSelector", field_selector);
        }
        if self.bookmarks {
            builder.append_pair("allowWatchBookmarks", "true");
        }
        if self.send_initial_events {
            builder.append_pair("sendInitialEvents", "true");
            builder.append_pair("resourceVersionMatch", "NotOlderThan");
        }

        builder.finish()
    }
}

#[derive(Deserialize)]
pub struct BookmarkMeta {
    /// The only field we need from a Bookmark event.
    #[serde(rename = "resourceVersion")]
    pub resource_version: String,

    /// Kubernetes 1.27 Streaming Lists
    /// The rest of the fields are optional and may be empty.
    #[serde(default)]
    pub annotations: std::collections::BTreeMap<String, String>,
}

/// Can only be relied upon to have metadata with resource version.
/// Bookmarks contain apiVersion + kind + basically empty metadata
///
/// See https://kubernetes.io/docs/reference/using-api/api-concepts/#watch-bookmarks
#[derive(Deserialize)]
pub struct Bookmark {
    /// Basically empty metadata
    pub metadata: BookmarkMeta,
}

/// A raw event returned from a watch query
///
/// Note that a watch query returns many of these as newline separated JSON
#[derive(Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent<K> {
    /// Resource was added
    Added(K),
    /// Resource was modified
    Modified(K),
    /// Resource was deleted
    Deleted(K),
    /// Resource bookmark. `Bookmark` is a slimmed down `K`
    /// From [Watch bookmarks](https://kubernetes.io/docs/reference/using-api/api-concepts/#watch-bookmarks).
    /// NB: This became Beta first in Kubernetes 1.16
    Bookmark(Bookmark),
    /// There was some kind of error
    Error(ErrorResponse),
}

#[derive(Clone)]
pub struct Client {
    http_client: HttpClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    auth: Auth,
    endpoint: String,
}

impl Client {
    pub fn new(config: Config) -> Result<Self, Error> {
        let builder = HttpsConnectorBuilder::new()
            .with_tls_config(config.tls)
            .https_or_http();
        let mut inner = HttpConnector::new();
        inner.enforce_http(false);
        let connector = builder.enable_http1().wrap_connector(inner);

        let http_client =
            hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(connector);

        let endpoint = config
            .cluster_url
            .to_string()
            .trim_end_matches('/')
            .to_string();

        Ok(Client {
            http_client,
            endpoint,
            auth: config.auth,
        })
    }

    /// Retrieve version info of the API server, so we can check the compatibility
    pub async fn version(&self) -> Result<Version, Error> {
        self.request_json(Method::GET, "/version".to_string(), None)
            .await
    }

    /// List a collection of a resource
    pub async fn list<R: Resource>(&self, params: &ListParams) -> Result<ObjectList<R>, Error> {
        let query = params.query();
        let path = format!("{}?{}", R::url_path(None), query);

        self.request_json(Method::GET, path, None).await
    }

    /// Fetch a single object by namespace and name.
    pub(crate) async fn get_object<R: Resource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<R, Error> {
        self.request_json(Method::GET, R::object_url_path(namespace, name), None)
            .await
    }

    /// Create an object in `namespace`, the server assigned object is returned.
    pub(crate) async fn create_object<R: Resource>(
        &self,
        namespace: &str,
        obj: &R,
    ) -> Result<R, Error> {
        let body = encode_object(obj)?;

        self.request_json(Method::POST, R::url_path(Some(namespace)), Some(body))
            .await
    }

    /// Replace an object. If the object carries a resourceVersion the server
    /// rejects the write with 409 when it is stale.
    pub(crate) async fn update_object<R: Resource>(
        &self,
        namespace: &str,
        obj: &R,
    ) -> Result<R, Error> {
        let path = R::object_url_path(namespace, &obj.metadata().name);
        let body = encode_object(obj)?;

        self.request_json(Method::PUT, path, Some(body)).await
    }

    /// watch returns a stream the produce WatchEvent<R>, and it will stop if
    /// an error occurred or the connection timeout. So, user have to call this
    /// function again to get notified again.
    pub async fn watch<R: Resource>(
        &self,
        params: &WatchParams,
        version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<R>, Error>>, Error> {
        if let Some(timeout) = params.timeout {
            if timeout >= 295 {
                return Err(Error::Validation("invalid timeout limit".into()));
            }
        }

        let uri = format!(
            "{}{}?{}",
            self.endpoint,
            R::url_path(None),
            params.query(version)
        );

        trace!(message = "doing http request", uri);

        let req = self.build_request(Method::GET, uri, None)?;
        let resp = self.http_client.request(req).await.map_err(Error::Http)?;
        if !resp.status().is_success() {
            let (parts, incoming) = resp.into_parts();
            let body = incoming.collect().await?.to_bytes();
            return Err(Error::Api(decode_error(parts.status, &body)));
        }

        Ok(decode_events(resp.into_body()))
    }

    fn build_request(
        &self,
        method: Method,
        uri: String,
        body: Option<Vec<u8>>,
    ) -> Result<Request<Full<Bytes>>, Error> {
        let builder = Request::builder().method(method).uri(uri);
        let mut req = match body {
            Some(body) => builder
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(body)))?,
            None => builder.body(Full::<Bytes>::default())?,
        };

        self.auth.apply(&mut req).map_err(Error::RefreshToken)?;

        Ok(req)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: String,
        body: Option<Vec<u8>>,
    ) -> Result<T, Error> {
        let uri = format!("{}{}", self.endpoint, path);

        trace!(message = "doing http request", %method, uri);

        let req = self.build_request(method, uri, body)?;
        let resp = self.http_client.request(req).await.map_err(Error::Http)?;
        let (parts, incoming) = resp.into_parts();
        let body = incoming.collect().await?.to_bytes();

        if parts.status.is_success() {
            serde_json::from_slice(&body).map_err(Error::Deserialize)
        } else {
            Err(Error::Api(decode_error(parts.status, &body)))
        }
    }
}

fn decode_error(status: StatusCode, body: &[u8]) -> ErrorResponse {
    serde_json::from_slice::<ErrorResponse>(body)
        .unwrap_or_else(|_| ErrorResponse::from_status(status, body))
}

/// Serialize an object with `apiVersion` and `kind` filled in, the typed
/// structs don't carry them.
fn encode_object<R: Resource>(obj: &R) -> Result<Vec<u8>, Error> {
    let mut value = serde_json::to_value(obj).map_err(Error::Serialize)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), R::api_version().into());
        map.insert("kind".to_string(), R::KIND.into());
    }

    serde_json::to_vec(&value).map_err(Error::Serialize)
}

fn decode_events<R: Resource>(
    body: hyper::body::Incoming,
) -> BoxStream<'static, Result<WatchEvent<R>, Error>> {
    let frames = FramedRead::new(
        StreamReader::new(body.into_data_stream().map_err(|err| {
            // Unexpected EOF from chunked decoder.
            // Tends to happen when watching for 300+s. This will be ignored
            if err.to_string().contains("unexpected EOF during check") {
                return std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err);
            }

            std::io::Error::other(err)
        })),
        LinesCodec::new(),
    );

    Box::pin(frames.filter_map(|result| async move { decode_line::<R>(result) }))
}

fn decode_line<R: Resource>(
    result: Result<String, LinesCodecError>,
) -> Option<Result<WatchEvent<R>, Error>> {
    match result {
        Ok(line) => match serde_json::from_str::<WatchEvent<R>>(&line) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                // Ignore EOF error that can happen for incomplete line from `decode_eof`.
                if err.is_eof() {
                    return None;
                }

                // Got general error response
                if let Ok(resp) = serde_json::from_str::<ErrorResponse>(&line) {
                    return Some(Err(Error::Api(resp)));
                }

                Some(Err(Error::Deserialize(err)))
            }
        },
        Err(LinesCodecError::Io(err)) => match err.kind() {
            std::io::ErrorKind::TimedOut => {
                tracing::warn!("timeout in poll: {}", err);
                None
            }
            // Tends to happen after 300+s of watching.
            std::io::ErrorKind::UnexpectedEof => {
                tracing::warn!("eof in poll: {}", err);
                None
            }
            _ => Some(Err(Error::ReadEvents(err))),
        },
        Err(LinesCodecError::MaxLineLengthExceeded) => {
            Some(Err(Error::LinesCodecMaxLineLengthExceeded))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::resource::deployment::Deployment;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: String::new(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn classify() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(!api_error(404, "NotFound").is_conflict());
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!api_error(409, "Conflict").is_already_exists());
        assert!(api_error(409, "AlreadyExists").is_already_exists());
        assert!(!Error::Validation("x".into()).is_not_found());
    }

    #[test]
    fn error_body_not_status() {
        let resp = decode_error(StatusCode::NOT_FOUND, b"404 page not found");
        assert_eq!(resp.code, 404);
        assert_eq!(resp.reason, "Not Found");
        assert_eq!(resp.message, "404 page not found");

        let resp = decode_error(
            StatusCode::CONFLICT,
            br#"{"kind":"Status","status":"Failure","message":"deployments.apps \"web\" already exists","reason":"AlreadyExists","code":409}"#,
        );
        assert_eq!(resp.reason, "AlreadyExists");
        assert_eq!(resp.code, 409);
    }

    #[test]
    fn encode_fills_type_meta() {
        let mut deployment = Deployment::default();
        deployment.metadata.name = "web".into();

        let body = encode_object(&deployment).unwrap();
        let value = serde_json::from_slice::<serde_json::Value>(&body).unwrap();
        assert_eq!(value["apiVersion"], "apps/v1");
        assert_eq!(value["kind"], "Deployment");
        assert_eq!(value["metadata"]["name"], "web");
    }

    #[test]
    fn list_query() {
        let params = ListParams {
            label_selector: Some("app=nginx".into()),
            limit: Some(500),
            continue_token: Some("abc".into()),
            resource_version: Some("0".into()),
            ..Default::default()
        };
        assert_eq!(params.query(), "labelSelector=app%3Dnginx&limit=500&continue=abc");

        let params = ListParams {
            limit: Some(500),
            resource_version: Some("120".into()),
            ..Default::default()
        };
        assert_eq!(
            params.query(),
            "limit=500&resourceVersion=120&resourceVersionMatch=NotOlderThan"
        );
    }

    #[test]
    fn watch_query() {
        let params = WatchParams {
            bookmarks: true,
            send_initial_events: true,
            ..Default::default()
        };
        assert_eq!(
            params.query("10"),
            "resourceVersion=10&watch=true&timeoutSeconds=290&allowWatchBookmarks=true&sendInitialEvents=true&resourceVersionMatch=NotOlderThan"
        );
    }

    #[test]
    fn decode_watch_lines() {
        let line = r#"{"type":"ADDED","object":{"metadata":{"name":"web","namespace":"ns","resourceVersion":"3"},"spec":{}}}"#;
        match decode_line::<Deployment>(Ok(line.to_string())) {
            Some(Ok(WatchEvent::Added(obj))) => assert_eq!(obj.metadata.name, "web"),
            _ => panic!("expect added event"),
        }

        let line = r#"{"type":"ERROR","object":{"kind":"Status","status":"Failure","message":"too old resource version","reason":"Expired","code":410}}"#;
        match decode_line::<Deployment>(Ok(line.to_string())) {
            Some(Ok(WatchEvent::Error(resp))) => assert_eq!(resp.code, 410),
            _ => panic!("expect error event"),
        }

        let line = r#"{"type":"BOOKMARK","object":{"metadata":{"resourceVersion":"12","annotations":{"k8s.io/initial-events-end":"true"}}}}"#;
        match decode_line::<Deployment>(Ok(line.to_string())) {
            Some(Ok(WatchEvent::Bookmark(bookmark))) => {
                assert_eq!(bookmark.metadata.resource_version, "12");
                assert!(
                    bookmark
                        .metadata
                        .annotations
                        .contains_key("k8s.io/initial-events-end")
                );
            }
            _ => panic!("expect bookmark event"),
        }
    }
}
