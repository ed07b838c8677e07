//! Client side admin lock.
//!
//! Unlocking asks for a shared PIN and keeps the gate open for a configured
//! number of minutes by persisting the expiry in a [`Store`]. This is a
//! convenience to keep casual users out of admin screens, not a security
//! boundary: anyone with access to the store can unlock it.

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::config::Config;
use crate::storage::Store;
use crate::toast::{Kind, Notifier};

/// store key holding the expiry, in milliseconds since the epoch
pub const SESSION_KEY : &str = "yardos_admin_until";
const PIN_PROMPT : &str = "Enter admin PIN: ";

pub trait Clock : Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

pub trait PinPrompt : Send + Sync {
    /// `None` when the user cancels
    fn ask(&self, prompt : &str) -> Option<String>;
}

/// A failed read, EOF or a blank line is a cancel. Ctrl-D comes back from
/// the terminal as an empty line, so the two cannot be told apart.
fn terminal_answer(read : std::io::Result<String>) -> Option<String> {
    read.ok().filter(|pin| !pin.trim().is_empty())
}

/// Reads the PIN from the terminal without echoing it.
#[cfg(feature = "cli")]
pub struct TerminalPrompt;

#[cfg(feature = "cli")]
impl PinPrompt for TerminalPrompt {
    fn ask(&self, prompt : &str) -> Option<String> {
        terminal_answer(rpassword::prompt_password_stdout(prompt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminState {
    Locked,
    Unlocked { until : i64 },
}

pub struct AdminGate {
    pin : String,
    session : Duration,
    store : Arc<dyn Store>,
    clock : Arc<dyn Clock>,
    prompt : Arc<dyn PinPrompt>,
    notifier : Arc<dyn Notifier>,
}

impl AdminGate {
    pub fn new<S, P, N>(config : &Config, store : S, prompt : P, notifier : N) -> Self
    where
        S : Store + 'static,
        P : PinPrompt + 'static,
        N : Notifier + 'static,
    {
        AdminGate {
            pin : config.admin_pin.clone(),
            session : config.admin_session(),
            store : Arc::new(store),
            clock : Arc::new(SystemClock),
            prompt : Arc::new(prompt),
            notifier : Arc::new(notifier),
        }
    }

    pub fn with_clock<C : Clock + 'static>(mut self, clock : C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// persisted expiry, anything missing or unreadable counts as 0
    fn expiry(&self) -> f64 {
        match self.store.get(SESSION_KEY) {
            Ok(Some(v)) => v.trim().parse::<f64>().ok().filter(|n| n.is_finite()).unwrap_or(0.0),
            Ok(None) => 0.0,
            Err(err) => {
                warn!(%err, "could not read admin session");
                0.0
            },
        }
    }

    pub fn status(&self) -> AdminState {
        let until = self.expiry();

        if (self.clock.now_millis() as f64) < until {
            AdminState::Unlocked { until : until as i64 }
        } else {
            AdminState::Locked
        }
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(self.status(), AdminState::Unlocked { .. })
    }

    /// Asks for the PIN and opens the gate on a match.
    ///
    /// A cancelled prompt fails quietly, a wrong PIN fails with a toast. Both
    /// leave the stored session untouched.
    pub fn unlock(&self) -> bool {
        let pin = match self.prompt.ask(PIN_PROMPT) {
            Some(pin) => pin,
            None => return false,
        };

        if pin.trim() != self.pin {
            warn!("wrong admin PIN");
            self.notifier.notify("Wrong PIN", Kind::Bad);
            return false
        }

        let session = i64::try_from(self.session.as_millis()).unwrap_or(i64::MAX);
        let until = self.clock.now_millis().saturating_add(session);

        if let Err(err) = self.store.set(SESSION_KEY, &until.to_string()) {
            warn!(%err, "could not save admin session");
            self.notifier.notify("Could not save admin session", Kind::Bad);
            return false
        }

        info!(until, "admin unlocked");
        self.notifier.notify("Admin unlocked", Kind::Ok);
        true
    }

    /// Clears the session. Never fails, a store that refuses the removal
    /// only earns a `bad` toast.
    pub fn lock(&self) {
        if let Err(err) = self.store.remove(SESSION_KEY) {
            warn!(%err, "could not clear admin session");
            self.notifier.notify("Could not clear admin session", Kind::Bad);
            return
        }

        info!("admin locked");
        self.notifier.notify("Admin locked", Kind::Ok);
    }

    /// true right away when unlocked, otherwise asks for the PIN
    pub fn require_admin(&self) -> bool {
        self.is_unlocked() || self.unlock()
    }
}
