use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

/// Styling tag of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Ok,
    Warn,
    Bad,
}

impl Default for Kind {
    fn default() -> Self {
        Kind::Ok
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::Ok => "ok",
            Kind::Warn => "warn",
            Kind::Bad => "bad",
        })
    }
}

/// Best effort user feedback.
pub trait Notifier : Send + Sync {
    fn notify(&self, msg : &str, kind : Kind);
}

impl<T : Notifier + ?Sized> Notifier for Arc<T> {
    fn notify(&self, msg : &str, kind : Kind) {
        (**self).notify(msg, kind)
    }
}

/// Where toasts are drawn. Ids are unique per [`Toaster`].
pub trait Surface : Send + Sync + 'static {
    fn append(&self, id : u64, kind : Kind, msg : &str);
    fn set_visible(&self, id : u64, visible : bool);
    fn remove(&self, id : u64);
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub fade_in : Duration,
    pub visible_until : Duration,
    pub fade_out : Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            fade_in : Duration::from_millis(10),
            visible_until : Duration::from_millis(2800),
            fade_out : Duration::from_millis(250),
        }
    }
}

/// Shows a message on a [`Surface`] for a few seconds.
///
/// The element is appended right away, shown after `fade_in`, hidden once
/// `visible_until` has passed since the append and removed `fade_out` later.
/// The timeline runs on the current tokio runtime; outside of one the toast
/// only gets appended.
pub struct Toaster<S> {
    surface : Arc<S>,
    timing : Timing,
    next_id : AtomicU64,
}

impl<S : Surface> Toaster<S> {
    pub fn new(surface : S) -> Self {
        Toaster {
            surface : Arc::new(surface),
            timing : Timing::default(),
            next_id : AtomicU64::new(1),
        }
    }

    pub fn with_timing(mut self, timing : Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

impl<S : Surface> Notifier for Toaster<S> {
    fn notify(&self, msg : &str, kind : Kind) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(%kind, "toast: {}", msg);

        self.surface.append(id, kind, msg);

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return,
        };

        let surface = Arc::clone(&self.surface);
        let timing = self.timing;

        handle.spawn(async move {
            tokio::time::sleep(timing.fade_in).await;
            surface.set_visible(id, true);

            tokio::time::sleep(timing.visible_until.saturating_sub(timing.fade_in)).await;
            surface.set_visible(id, false);

            tokio::time::sleep(timing.fade_out).await;
            surface.remove(id);
        });
    }
}

/// Prints toasts to stderr as they are appended.
#[derive(Default)]
pub struct StderrSurface;

impl Surface for StderrSurface {
    fn append(&self, _ : u64, kind : Kind, msg : &str) {
        let _ = writeln!(std::io::stderr(), "[{}] {}", kind, msg);
    }

    fn set_visible(&self, _ : u64, _ : bool) {}

    fn remove(&self, _ : u64) {}
}
