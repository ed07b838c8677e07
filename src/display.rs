use serde::{Serialize, Deserialize};
use tracing::warn;

use crate::client::Transport;
use crate::query::Params;

pub const GET_CONFIG_ACTION : &str = "getConfig";
const DEFAULT_COMPANY_NAME : &str = "YardOS";
const DEFAULT_LOGO_URL : &str = "";

/// Branding shown in the app header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConfig {
    pub company_name : String,
    pub logo_url : String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            company_name : DEFAULT_COMPANY_NAME.to_string(),
            logo_url : DEFAULT_LOGO_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Remote {
    #[serde(default)]
    company_name : Option<String>,
    #[serde(default)]
    logo_url : Option<String>,
}

/// Fetches the display config, falling back to the built in default on any
/// error. Blank fields in the response are filled from the default too.
pub async fn load_display_config<T : Transport + ?Sized>(transport : &T) -> DisplayConfig {
    let envelope = match transport.get(Params::new().with("action", GET_CONFIG_ACTION)).await {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, "could not load display config, using default");
            return DisplayConfig::default()
        },
    };

    let remote = match envelope.payload::<Remote>() {
        Ok(remote) => remote,
        Err(err) => {
            warn!(%err, "malformed display config, using default");
            return DisplayConfig::default()
        },
    };

    let fallback = DisplayConfig::default();
    let non_blank = |s : Option<String>| s.filter(|s| !s.trim().is_empty());

    DisplayConfig {
        company_name : non_blank(remote.company_name).unwrap_or(fallback.company_name),
        logo_url : non_blank(remote.logo_url).unwrap_or(fallback.logo_url),
    }
}
