use std::fmt;

use url::Url;

/// A single query parameter value.
///
/// `Null` and empty strings are never written to a url.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    fn is_blank(&self) -> bool {
        match self {
            ParamValue::Null => true,
            ParamValue::Str(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => Ok(()),
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(n) => write!(f, "{}", n),
            ParamValue::Float(n) => write!(f, "{}", n),
            ParamValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

macro_rules! param_from {
    ($variant:ident, $conv:ty, $($ty:ty),*) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(v : $ty) -> Self {
                    ParamValue::$variant(<$conv>::from(v))
                }
            }
        )*
    }
}

param_from!(Str, String, &str, String, &String);
param_from!(Int, i64, i8, i16, i32, i64, u8, u16, u32);
param_from!(Float, f64, f32, f64);
param_from!(Bool, bool, bool);

impl<T : Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v : Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Ordered request parameters with unique keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries : Vec<(String, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// sets `key`, replacing an earlier value in place
    pub fn set<K, V>(&mut self, key : K, value : V) -> &mut Self
    where
        K : Into<String>,
        V : Into<ParamValue>,
    {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }

        self
    }

    pub fn with<K, V>(mut self, key : K, value : V) -> Self
    where
        K : Into<String>,
        V : Into<ParamValue>,
    {
        self.set(key, value);
        self
    }

    /// copies every entry of `other` into `self` with set semantics
    pub fn merge(&mut self, other : Params) -> &mut Self {
        for (k, v) in other.entries {
            self.set(k, v);
        }

        self
    }

    pub fn get(&self, key : &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// parses a `key=value` argument, a missing `=` gives an empty value
    pub fn parse_pair(arg : &str) -> (String, ParamValue) {
        match arg.find('=') {
            Some(i) => (arg[..i].to_string(), arg[i + 1..].into()),
            None => (arg.to_string(), ParamValue::Str(String::new())),
        }
    }
}

impl<K : Into<String>, V : Into<ParamValue>> std::iter::FromIterator<(K, V)> for Params {
    fn from_iter<I : IntoIterator<Item = (K, V)>>(iter : I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.set(k, v);
        }

        params
    }
}

/// Builds the request url for `params` on top of `base`.
///
/// Blank values are skipped, everything else replaces any query parameter of
/// the same name already on `base`. A non-empty `api_key` always ends up as
/// the single `key` parameter.
pub fn build_url(base : &Url, params : &Params, api_key : Option<&str>) -> Url {
    let mut pairs : Vec<(String, String)> = base
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    for (k, v) in params.iter() {
        if v.is_blank() {
            continue
        }

        set_pair(&mut pairs, k, v.to_string());
    }

    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        set_pair(&mut pairs, "key", key.to_string());
    }

    let mut url = base.clone();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    url
}

fn set_pair(pairs : &mut Vec<(String, String)>, key : &str, value : String) {
    match pairs.iter().position(|(k, _)| k == key) {
        Some(i) => {
            pairs[i].1 = value;
            let mut idx = 0;
            pairs.retain(|(k, _)| {
                idx += 1;
                idx - 1 <= i || k != key
            });
        },
        None => pairs.push((key.to_string(), value)),
    }
}
