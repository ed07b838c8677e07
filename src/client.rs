use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use http::StatusCode as S;
use hyper::Body;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use quick_from::QuickFrom;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::{Config, TransportKind};
use crate::jsonp::JsonpClient;
use crate::query::{build_url, Params, ParamValue};
use crate::Envelope;


pub type Result<T> = std::result::Result<T, Error>;

const PARSE_SNIPPET_CHARS : usize = 300;
const MAX_REDIRECTS : usize = 20;

#[derive(Debug, QuickFrom)]
pub enum Error {
    /// Response body was not json, holds its first 300 characters
    Parse(String),

    /// Error from the api response
    Api(String),

    /// The jsonp callback did not fire in time
    Timeout(Duration),

    /// The jsonp script could not be loaded
    Load(String),

    CallbackCollision(String),
    TooManyRedirects,

    #[quick_from]
    Hyper(hyper::Error),

    #[quick_from]
    SerdeJson(serde_json::Error),

    #[quick_from]
    Http(http::Error),

    #[quick_from]
    Url(url::ParseError),
}

impl fmt::Display for Error {
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(snippet) => write!(f, "API parse error. Response: {}", snippet),
            Error::Api(msg) => f.write_str(msg),
            Error::Timeout(after) => write!(f, "API timeout after {:?}", after),
            Error::Load(reason) => write!(f, "API load error: {}", reason),
            Error::CallbackCollision(name) => write!(f, "callback name {} already in use", name),
            Error::TooManyRedirects => f.write_str("too many redirects"),
            Error::Hyper(err) => write!(f, "network error: {}", err),
            Error::SerdeJson(err) => write!(f, "json error: {}", err),
            Error::Http(err) => write!(f, "invalid request: {}", err),
            Error::Url(err) => write!(f, "invalid url: {}", err),
        }
    }
}

impl std::error::Error for Error {}

/// Sends requests to the api and checks the envelope that comes back.
#[async_trait]
pub trait Transport : Send + Sync {
    async fn get(&self, params : Params) -> Result<Envelope>;

    /// `action` and `extra` go in the query string, `payload` is the body
    async fn post(&self, action : &str, payload : &Value, extra : Params) -> Result<Envelope>;
}

#[async_trait]
impl<T : Transport + ?Sized> Transport for Arc<T> {
    async fn get(&self, params : Params) -> Result<Envelope> {
        (**self).get(params).await
    }

    async fn post(&self, action : &str, payload : &Value, extra : Params) -> Result<Envelope> {
        (**self).post(action, payload, extra).await
    }
}

#[async_trait]
impl<T : Transport + ?Sized> Transport for Box<T> {
    async fn get(&self, params : Params) -> Result<Envelope> {
        (**self).get(params).await
    }

    async fn post(&self, action : &str, payload : &Value, extra : Params) -> Result<Envelope> {
        (**self).post(action, payload, extra).await
    }
}

pub(crate) fn post_params(action : &str, extra : Params) -> Params {
    let mut params = Params::new().with("action", action);
    params.merge(extra);
    params
}

/// parses a response body and checks its envelope
pub fn parse_envelope(text : &str) -> Result<Envelope> {
    let value : Value = serde_json::from_str(text).map_err(|_| {
        Error::Parse(text.chars().take(PARSE_SNIPPET_CHARS).collect())
    })?;

    Envelope::check(value).map_err(Error::Api)
}

pub(crate) fn https_client() -> HttpsClient {
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    hyper::Client::builder().build(connector)
}

pub(crate) type HttpsClient = hyper::Client<HttpsConnector<HttpConnector>>;

/// sends the request, following redirects the way a browser does, and
/// returns the final status and body text
pub(crate) async fn request_text(
    client : &HttpsClient,
    mut method : Method,
    mut url : Url,
    mut body : Option<Vec<u8>>,
) -> Result<(S, String)> {

    for _ in 0..=MAX_REDIRECTS {
        let mut req = http::Request::builder()
            .uri(url.as_str())
            .method(method.clone());

        if body.is_some() {
            req = req.header(http::header::CONTENT_TYPE, "application/json");
        }

        let req = req.body(body.clone().map(Body::from).unwrap_or_else(Body::empty))?;

        let (parts, resp_body) = client.request(req).await?.into_parts();

        let location = parts.headers
            .get(http::header::LOCATION)
            .and_then(|l| l.to_str().ok());

        match (parts.status, location) {
            (S::MOVED_PERMANENTLY, Some(loc)) |
            (S::FOUND, Some(loc)) |
            (S::SEE_OTHER, Some(loc)) |
            (S::TEMPORARY_REDIRECT, Some(loc)) |
            (S::PERMANENT_REDIRECT, Some(loc)) => {
                let next = url.join(loc)?;
                debug!(status = %parts.status, "following redirect");

                let to_get = parts.status == S::SEE_OTHER
                    || (method == Method::POST
                        && (parts.status == S::MOVED_PERMANENTLY || parts.status == S::FOUND));

                if to_get {
                    method = Method::GET;
                    body = None;
                }

                url = next;
                continue
            },
            _ => {},
        }

        let bytes = hyper::body::to_bytes(resp_body).await?;
        return Ok((parts.status, String::from_utf8_lossy(&bytes).into_owned()))
    }

    Err(Error::TooManyRedirects)
}

fn action_of(params : &Params) -> String {
    params.get("action").map(ParamValue::to_string).unwrap_or_default()
}

/// Talks to the api with plain http requests.
pub struct Client {
    api_base : Url,
    api_key : Option<String>,
    client : HttpsClient,
}

impl From<&Config> for Client {
    fn from(config : &Config) -> Self {
        Client::new(config.api_base.clone(), config.api_key().map(str::to_string))
    }
}

impl Client {
    pub fn new(api_base : Url, api_key : Option<String>) -> Self {
        Client {
            api_base,
            api_key : api_key.filter(|k| !k.is_empty()),
            client : https_client(),
        }
    }

    pub fn url(&self, params : &Params) -> Url {
        build_url(&self.api_base, params, self.api_key.as_deref())
    }
}

/// the transport this deployment is configured to use
pub fn transport(config : &Config) -> Box<dyn Transport> {
    match config.transport {
        TransportKind::Fetch => Box::new(Client::from(config)),
        TransportKind::Jsonp => Box::new(JsonpClient::from(config)),
    }
}

#[async_trait]
impl Transport for Client {
    async fn get(&self, params : Params) -> Result<Envelope> {
        debug!(action = %action_of(&params), "api get");

        let (_, text) = request_text(&self.client, Method::GET, self.url(&params), None).await?;
        parse_envelope(&text)
    }

    async fn post(&self, action : &str, payload : &Value, extra : Params) -> Result<Envelope> {
        debug!(action = %action, "api post");

        let body = serde_json::to_vec(payload)?;
        let url = self.url(&post_params(action, extra));

        let (_, text) = request_text(&self.client, Method::POST, url, Some(body)).await?;
        parse_envelope(&text)
    }
}
