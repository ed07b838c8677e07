//! JSONP transport.
//!
//! Every call reserves a uniquely named callback in a [`CallbackRegistry`],
//! loads `<api>?...&callback=<name>` as a script and waits for the script to
//! invoke that callback with the response envelope. The reservation is
//! released on every exit path, including timeouts and dropped futures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use rand::{thread_rng, Rng};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use crate::client::{self, post_params, Error, HttpsClient, Result, Transport};
use crate::config::Config;
use crate::query::{build_url, Params};
use crate::Envelope;

pub const DEFAULT_TIMEOUT : Duration = Duration::from_secs(12);
pub const CALLBACK_PREFIX : &str = "yardos_cb_";
const NAME_ATTEMPTS : usize = 8;

/// Callbacks waiting for their script to run, keyed by callback name.
///
/// An entry lives from [`CallbackRegistry::register`] until its
/// [`Registration`] is dropped. Invoking takes the sender out but leaves the
/// name reserved, so a callback resolves at most once and a name is never
/// handed to a second call while the first still holds it.
#[derive(Default)]
pub struct CallbackRegistry {
    pending : Mutex<HashMap<String, Option<oneshot::Sender<Value>>>>,
}

impl CallbackRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// the registry shared by every client in the process
    pub fn global() -> Arc<Self> {
        static GLOBAL : OnceLock<Arc<CallbackRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(CallbackRegistry::new))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Option<oneshot::Sender<Value>>>> {
        self.pending.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// reserves `name`, or returns `None` if it is taken
    pub fn register(
        self : &Arc<Self>,
        name : &str,
    ) -> Option<(Registration, oneshot::Receiver<Value>)> {
        let mut pending = self.lock();
        if pending.contains_key(name) {
            return None
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(name.to_string(), Some(tx));

        let registration = Registration {
            registry : Arc::clone(self),
            name : name.to_string(),
        };

        Some((registration, rx))
    }

    /// hands `arg` to the call waiting on `name`, false if nobody is
    pub fn invoke(&self, name : &str, arg : Value) -> bool {
        let sender = self.lock().get_mut(name).and_then(Option::take);

        match sender {
            Some(tx) => tx.send(arg).is_ok(),
            None => false,
        }
    }

    pub fn is_registered(&self, name : &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Holds a callback name; dropping it removes the registry entry.
pub struct Registration {
    registry : Arc<CallbackRegistry>,
    name : String,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.name);
    }
}

/// Fetches the script text a jsonp url points at.
#[async_trait]
pub trait ScriptLoader : Send + Sync {
    async fn load(&self, url : &Url) -> Result<String>;
}

/// Loads scripts over http(s). Transport failures and non 2xx answers are
/// load errors, like a failing `<script>` tag.
pub struct HttpLoader {
    client : HttpsClient,
}

impl Default for HttpLoader {
    fn default() -> Self {
        HttpLoader {
            client : client::https_client(),
        }
    }
}

#[async_trait]
impl ScriptLoader for HttpLoader {
    async fn load(&self, url : &Url) -> Result<String> {
        let (status, text) = client::request_text(&self.client, Method::GET, url.clone(), None)
            .await
            .map_err(|err| Error::Load(err.to_string()))?;

        if !status.is_success() {
            return Err(Error::Load(format!("status {}", status)))
        }

        Ok(text)
    }
}

/// Runs a jsonp script against `registry`.
///
/// Only the plain call form is understood: `name(<json>)`, optionally
/// prefixed with `/**/` and followed by `;`. Returns whether a waiting
/// callback received the argument.
pub fn run_script(registry : &CallbackRegistry, script : &str) -> bool {
    match parse_call(script) {
        Some((name, arg)) => {
            let invoked = registry.invoke(name, arg);
            if !invoked {
                warn!(callback = %name, "jsonp script called an unknown callback");
            }

            invoked
        },
        None => {
            warn!(
                script = %script.chars().take(80).collect::<String>(),
                "response is not a jsonp call"
            );
            false
        },
    }
}

fn parse_call(script : &str) -> Option<(&str, Value)> {
    let s = script.trim();
    let s = s.strip_prefix("/**/").unwrap_or(s).trim_start();
    let s = s.strip_suffix(';').unwrap_or(s).trim_end();

    let open = s.find('(')?;
    let name = s[..open].trim();
    if !is_identifier(name) {
        return None
    }

    let arg = s[open + 1..].strip_suffix(')')?;
    let arg = serde_json::from_str(arg).ok()?;

    Some((name, arg))
}

fn is_identifier(s : &str) -> bool {
    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {},
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// `yardos_cb_` followed by a random base 36 suffix
pub fn random_callback_name() -> String {
    let mut n : u64 = thread_rng().gen();
    let mut digits = Vec::new();

    loop {
        let d = (n % 36) as u32;
        digits.push(std::char::from_digit(d, 36).unwrap_or('0'));
        n /= 36;
        if n == 0 {
            break
        }
    }

    digits.iter().rev().fold(CALLBACK_PREFIX.to_string(), |mut s, c| {
        s.push(*c);
        s
    })
}

type NameGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Talks to the api by loading jsonp scripts.
pub struct JsonpClient {
    api_base : Url,
    api_key : Option<String>,
    timeout : Duration,
    registry : Arc<CallbackRegistry>,
    loader : Arc<dyn ScriptLoader>,
    names : NameGenerator,
}

impl From<&Config> for JsonpClient {
    fn from(config : &Config) -> Self {
        JsonpClient::new(config.api_base.clone(), config.api_key().map(str::to_string))
            .with_timeout(config.jsonp_timeout())
    }
}

impl JsonpClient {
    pub fn new(api_base : Url, api_key : Option<String>) -> Self {
        JsonpClient {
            api_base,
            api_key : api_key.filter(|k| !k.is_empty()),
            timeout : DEFAULT_TIMEOUT,
            registry : CallbackRegistry::global(),
            loader : Arc::new(HttpLoader::default()),
            names : Box::new(random_callback_name),
        }
    }

    pub fn with_timeout(mut self, timeout : Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_loader<L : ScriptLoader + 'static>(mut self, loader : L) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn with_registry(mut self, registry : Arc<CallbackRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_name_generator<F>(mut self, names : F) -> Self
    where
        F : Fn() -> String + Send + Sync + 'static,
    {
        self.names = Box::new(names);
        self
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    fn reserve(&self) -> Result<(Registration, oneshot::Receiver<Value>)> {
        let mut last = None;

        for _ in 0..NAME_ATTEMPTS {
            let name = (self.names)();
            if let Some(reserved) = self.registry.register(&name) {
                return Ok(reserved)
            }

            debug!(callback = %name, "callback name taken, drawing another");
            last = Some(name);
        }

        Err(Error::CallbackCollision(last.unwrap_or_default()))
    }

    async fn call(&self, mut params : Params) -> Result<Envelope> {
        let (registration, rx) = self.reserve()?;

        params.set("callback", registration.name());
        let url = build_url(&self.api_base, &params, self.api_key.as_deref());

        debug!(callback = %registration.name(), "jsonp request");

        let exchange = async {
            let script = self.loader.load(&url).await?;
            run_script(&self.registry, &script);

            rx.await.map_err(|_| Error::Load("callback dropped".to_string()))
        };

        let res = tokio::time::timeout(self.timeout, exchange).await;
        drop(registration);

        match res {
            Ok(Ok(arg)) => Envelope::check(arg).map_err(Error::Api),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                warn!(timeout = ?self.timeout, "jsonp callback never fired");
                Err(Error::Timeout(self.timeout))
            },
        }
    }
}

#[async_trait]
impl Transport for JsonpClient {
    async fn get(&self, params : Params) -> Result<Envelope> {
        self.call(params).await
    }

    /// jsonp can only GET, the payload travels json encoded as `payload`
    async fn post(&self, action : &str, payload : &Value, extra : Params) -> Result<Envelope> {
        let mut params = post_params(action, extra);
        params.set("payload", serde_json::to_string(payload)?);

        self.call(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn callback_of(url : &Url) -> String {
        url.query_pairs()
            .find(|(k, _)| k == "callback")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    /// answers every load by calling back with `body`
    struct Echo(Value);

    #[async_trait]
    impl ScriptLoader for Echo {
        async fn load(&self, url : &Url) -> Result<String> {
            Ok(format!("/**/{}({});", callback_of(url), self.0))
        }
    }

    /// loads fine but never calls back
    struct Silent;

    #[async_trait]
    impl ScriptLoader for Silent {
        async fn load(&self, _ : &Url) -> Result<String> {
            Ok("console.log('hi')".to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl ScriptLoader for Broken {
        async fn load(&self, _ : &Url) -> Result<String> {
            Err(Error::Load("status 404 Not Found".to_string()))
        }
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// never finishes loading, records when the load is abandoned
    struct Hanging(Arc<AtomicBool>);

    #[async_trait]
    impl ScriptLoader for Hanging {
        async fn load(&self, _ : &Url) -> Result<String> {
            let _guard = SetOnDrop(Arc::clone(&self.0));
            std::future::pending::<Result<String>>().await
        }
    }

    /// waits for the gate before calling back
    struct Gated(Arc<Notify>, Value);

    #[async_trait]
    impl ScriptLoader for Gated {
        async fn load(&self, url : &Url) -> Result<String> {
            self.0.notified().await;
            Ok(format!("{}({})", callback_of(url), self.1))
        }
    }

    fn client<L : ScriptLoader + 'static>(loader : L) -> JsonpClient {
        JsonpClient::new(Url::parse("https://script.example.com/exec").unwrap(), Some("k".into()))
            .with_registry(CallbackRegistry::new())
            .with_loader(loader)
    }

    #[tokio::test]
    async fn resolves_with_envelope() {
        let c = client(Echo(json!({ "ok" : true, "companyName" : "Acme" })));

        let env = c.get(Params::new().with("action", "getConfig")).await.unwrap();

        assert_eq!(env.get("companyName"), Some(&json!("Acme")));
        assert!(c.registry().is_empty());
    }

    #[tokio::test]
    async fn refused_envelope_is_api_error() {
        let c = client(Echo(json!({ "ok" : false, "error" : "bad key" })));

        match c.get(Params::new()).await {
            Err(Error::Api(msg)) => assert_eq!(msg, "bad key"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(c.registry().is_empty());
    }

    #[tokio::test]
    async fn non_object_argument_is_api_error() {
        let c = client(Echo(json!([1, 2, 3])));

        match c.get(Params::new()).await {
            Err(Error::Api(msg)) => assert_eq!(msg, "API error"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_script_times_out_and_cleans_up() {
        let c = client(Silent);
        let start = tokio::time::Instant::now();

        let res = c.get(Params::new()).await;

        assert!(matches!(res, Err(Error::Timeout(d)) if d == Duration::from_millis(12_000)));
        assert!(start.elapsed() >= Duration::from_secs(12));
        assert!(c.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_drops_inflight_load() {
        let dropped = Arc::new(AtomicBool::new(false));
        let c = client(Hanging(Arc::clone(&dropped))).with_timeout(Duration::from_secs(3));

        let res = c.get(Params::new()).await;

        assert!(matches!(res, Err(Error::Timeout(_))));
        assert!(dropped.load(Ordering::SeqCst));
        assert!(c.registry().is_empty());
    }

    #[tokio::test]
    async fn load_error_cleans_up() {
        let c = client(Broken);

        assert!(matches!(c.get(Params::new()).await, Err(Error::Load(_))));
        assert!(c.registry().is_empty());
    }

    #[tokio::test]
    async fn dropped_call_cleans_up() {
        let c = client(Hanging(Arc::new(AtomicBool::new(false))));

        {
            let call = c.get(Params::new());
            tokio::pin!(call);
            let polled = tokio::time::timeout(Duration::from_millis(10), &mut call).await;
            assert!(polled.is_err());
            assert_eq!(c.registry().len(), 1);
        }

        assert!(c.registry().is_empty());
    }

    #[tokio::test]
    async fn forced_collision_fails_without_touching_first_call() {
        let gate = Arc::new(Notify::new());
        let c = Arc::new(
            client(Gated(Arc::clone(&gate), json!({ "ok" : true, "n" : 1 })))
                .with_name_generator(|| "yardos_cb_fixed".to_string())
        );

        let first = tokio::spawn({
            let c = Arc::clone(&c);
            async move { c.get(Params::new()).await }
        });

        while !c.registry().is_registered("yardos_cb_fixed") {
            tokio::task::yield_now().await;
        }

        match c.get(Params::new()).await {
            Err(Error::CallbackCollision(name)) => assert_eq!(name, "yardos_cb_fixed"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(c.registry().is_registered("yardos_cb_fixed"));

        gate.notify_one();
        let env = first.await.unwrap().unwrap();

        assert_eq!(env.get("n"), Some(&json!(1)));
        assert!(c.registry().is_empty());
    }

    #[tokio::test]
    async fn concurrent_calls_use_distinct_names() {
        let c = client(Echo(json!({ "ok" : true })));

        let (a, b) = tokio::join!(c.get(Params::new()), c.get(Params::new()));

        assert!(a.is_ok() && b.is_ok());
        assert!(c.registry().is_empty());
    }

    #[tokio::test]
    async fn post_sends_payload_as_query() {
        struct Capture(Mutex<Option<Url>>);

        #[async_trait]
        impl ScriptLoader for Capture {
            async fn load(&self, url : &Url) -> Result<String> {
                *self.0.lock().unwrap() = Some(url.clone());
                Ok(format!("{}({{\"ok\":true}})", callback_of(url)))
            }
        }

        let capture = Arc::new(Capture(Mutex::new(None)));

        struct Shared(Arc<Capture>);

        #[async_trait]
        impl ScriptLoader for Shared {
            async fn load(&self, url : &Url) -> Result<String> {
                self.0.load(url).await
            }
        }

        let c = client(Shared(Arc::clone(&capture)));
        c.post("saveItem", &json!({ "sku" : "A1" }), Params::new().with("row", 4)).await.unwrap();

        let url = capture.0.lock().unwrap().clone().unwrap();
        let pairs : HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["action"], "saveItem");
        assert_eq!(pairs["row"], "4");
        assert_eq!(pairs["payload"], r#"{"sku":"A1"}"#);
        assert_eq!(pairs["key"], "k");
        assert!(pairs["callback"].starts_with(CALLBACK_PREFIX));
    }

    #[test]
    fn callback_resolves_once() {
        let registry = CallbackRegistry::new();
        let (_registration, _rx) = registry.register("cb").unwrap();

        assert!(registry.invoke("cb", json!({ "ok" : true })));
        assert!(!registry.invoke("cb", json!({ "ok" : true })));
        assert!(registry.is_registered("cb"));
    }

    #[test]
    fn register_refuses_taken_name() {
        let registry = CallbackRegistry::new();
        let first = registry.register("cb").unwrap();

        assert!(registry.register("cb").is_none());
        drop(first);
        assert!(registry.register("cb").is_some());
    }

    #[test]
    fn parses_call_forms() {
        assert_eq!(parse_call("cb({\"ok\":true})"), Some(("cb", json!({ "ok" : true }))));
        assert_eq!(parse_call(" /**/ cb_1 ( [1] ) ; \n"), Some(("cb_1", json!([1]))));
        assert_eq!(parse_call("alert(1); cb({})"), None);
        assert_eq!(parse_call("cb(not json)"), None);
        assert_eq!(parse_call("{\"ok\":true}"), None);
    }

    #[test]
    fn random_names_are_prefixed_base36() {
        let name = random_callback_name();
        let suffix = &name[CALLBACK_PREFIX.len()..];

        assert!(name.starts_with(CALLBACK_PREFIX));
        assert!(!suffix.is_empty());
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(random_callback_name(), random_callback_name());
    }
}
