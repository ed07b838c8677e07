use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use yardos::jsonp::{CallbackRegistry, JsonpClient};
use yardos::{Error, Params, Transport};

/// answers like an apps script jsonp endpoint
struct JsonpEndpoint(serde_json::Value);

impl Respond for JsonpEndpoint {
    fn respond(&self, req : &Request) -> ResponseTemplate {
        let callback = req.url
            .query_pairs()
            .find(|(k, _)| k == "callback")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        ResponseTemplate::new(200)
            .insert_header("Content-Type", "application/javascript")
            .set_body_string(format!("/**/{}({});", callback, self.0))
    }
}

fn client(server : &MockServer) -> JsonpClient {
    let base = Url::parse(&format!("{}/exec", server.uri())).unwrap();
    JsonpClient::new(base, Some("k".to_string())).with_registry(CallbackRegistry::new())
}

#[tokio::test]
async fn loads_script_and_resolves() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/exec"))
        .and(query_param("action", "getConfig"))
        .and(query_param("key", "k"))
        .respond_with(JsonpEndpoint(json!({ "ok" : true, "companyName" : "Acme" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let envelope = client.get(Params::new().with("action", "getConfig")).await.unwrap();

    assert_eq!(envelope.get("companyName"), Some(&json!("Acme")));
    assert!(client.registry().is_empty());
}

#[tokio::test]
async fn failed_load_is_load_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server);

    assert!(matches!(client.get(Params::new()).await, Err(Error::Load(_))));
    assert!(client.registry().is_empty());
}

#[tokio::test]
async fn refused_envelope_is_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(JsonpEndpoint(json!({ "ok" : false, "error" : "Bad key" })))
        .mount(&server)
        .await;

    match client(&server).get(Params::new()).await {
        Err(Error::Api(msg)) => assert_eq!(msg, "Bad key"),
        other => panic!("unexpected {:?}", other),
    }
}
