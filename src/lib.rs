use serde::{Serialize,Deserialize};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub mod config;
pub mod query;
pub mod client;
pub mod jsonp;
pub mod toast;
pub mod storage;
pub mod admin;
pub mod display;
pub mod text;

pub use client::{Client, Error, Transport};
pub use query::{build_url, Params, ParamValue};

const GENERIC_API_ERROR : &str = "API error";

/// The `{ ok, error?, ...payload }` wrapper every api response comes in.
///
/// Only an object whose `ok` field is exactly `true` makes it into an
/// `Envelope`, see [`Envelope::check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// accepts a parsed response, or returns the message the api gave for
    /// refusing it
    pub fn check(value : Value) -> std::result::Result<Self, String> {
        match value {
            Value::Object(map) if map.get("ok") == Some(&Value::Bool(true)) => {
                Ok(Envelope(map))
            },
            other => Err(error_message(&other)),
        }
    }

    pub fn get(&self, field : &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// deserializes the whole envelope, `ok` included, into `T`
    pub fn payload<T : DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn error_message(value : &Value) -> String {
    match value.get("error") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        None | Some(Value::Null) | Some(Value::Bool(false)) | Some(Value::String(_)) => {
            GENERIC_API_ERROR.to_string()
        },
        Some(other) => other.to_string(),
    }
}
