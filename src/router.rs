//! Demultiplexes inbound frames to per-type handlers.
//!
//! Handlers are keyed by the `$type` discriminator. Registering a type that
//! already has a handler replaces it (last registration wins). Frames with an
//! unregistered type, no discriminator, or invalid JSON are dropped without
//! error so older clients keep working when the server adds messages.
//!
//! [`Router::register`] returns a [`Registration`]. Dropping it removes the
//! handler, unless a newer registration has already replaced it, so a model
//! torn down with its view can never receive stale callbacks.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use zlehcito_client::router::{Dispatch, Router};
//!
//! let router = Router::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let registration = router.register("RACE_NEW_TERM", move |envelope| {
//!     sink.lock().unwrap().push(envelope.kind().to_owned());
//! });
//!
//! assert_eq!(router.dispatch(r#"{"$type":"RACE_NEW_TERM","term":"x"}"#), Dispatch::Handled);
//! assert_eq!(router.dispatch(r#"{"$type":"SOMETHING_NEW"}"#), Dispatch::Unhandled);
//! drop(registration);
//! assert_eq!(router.dispatch(r#"{"$type":"RACE_NEW_TERM","term":"y"}"#), Dispatch::Unhandled);
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::protocol::Envelope;

/// Callback for one message type.
///
/// Handlers run on the dispatching task, one frame at a time, while the
/// router's lock is held: they must not block and must not register or
/// unregister handlers themselves.
pub type Handler = Box<dyn FnMut(&Envelope) + Send>;

/// Outcome of [`Router::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler was invoked.
    Handled,
    /// Valid envelope, but no handler is registered for its type.
    Unhandled,
    /// Not JSON, or no string `$type`.
    Malformed,
}

struct Slot {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Table {
    slots: HashMap<String, Slot>,
    next_id: u64,
}

/// Discriminator → handler table.
#[derive(Clone, Default)]
pub struct Router {
    table: Arc<Mutex<Table>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `handler` for `kind`, replacing any existing one.
    #[must_use = "dropping the registration unregisters the handler"]
    pub fn register<F>(&self, kind: impl Into<String>, handler: F) -> Registration
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        let kind = kind.into();
        let mut table = self.lock();
        table.next_id += 1;
        let id = table.next_id;
        let replaced = table
            .slots
            .insert(
                kind.clone(),
                Slot {
                    id,
                    handler: Box::new(handler),
                },
            )
            .is_some();
        if replaced {
            debug!(kind = %kind, "handler replaced");
        } else {
            trace!(kind = %kind, "handler registered");
        }
        Registration {
            table: Arc::downgrade(&self.table),
            kind,
            id,
        }
    }

    /// Like [`register`](Self::register), but decodes the body into `T` first.
    ///
    /// A body that does not decode is logged and skipped, so whatever state
    /// the handler maintains stays as it was.
    #[must_use = "dropping the registration unregisters the handler"]
    pub fn register_decoded<T, F>(&self, kind: impl Into<String>, mut handler: F) -> Registration
    where
        T: DeserializeOwned,
        F: FnMut(T) + Send + 'static,
    {
        self.register(kind, move |envelope| match envelope.decode::<T>() {
            Ok(payload) => handler(payload),
            Err(e) => {
                warn!(kind = %envelope.kind(), error = %e, "payload did not decode; keeping previous state");
            }
        })
    }

    /// `true` if a handler is currently installed for `kind`.
    pub fn is_registered(&self, kind: &str) -> bool {
        self.lock().slots.contains_key(kind)
    }

    /// Route one raw frame to its handler.
    pub fn dispatch(&self, raw: &str) -> Dispatch {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return Dispatch::Malformed;
            }
        };
        self.dispatch_envelope(&envelope)
    }

    /// Route an already parsed envelope.
    pub fn dispatch_envelope(&self, envelope: &Envelope) -> Dispatch {
        let mut table = self.lock();
        match table.slots.get_mut(envelope.kind()) {
            Some(slot) => {
                trace!(kind = %envelope.kind(), "dispatching");
                (slot.handler)(envelope);
                Dispatch::Handled
            }
            None => {
                debug!(kind = %envelope.kind(), "no handler registered; dropping frame");
                Dispatch::Unhandled
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.lock();
        let mut kinds: Vec<&str> = table.slots.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("Router").field("handlers", &kinds).finish()
    }
}

/// Unregisters its handler on drop.
#[derive(Debug)]
pub struct Registration {
    table: Weak<Mutex<Table>>,
    kind: String,
    id: u64,
}

impl Registration {
    /// The message type this registration covers.
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.slots.get(&self.kind).is_some_and(|slot| slot.id == self.id) {
            table.slots.remove(&self.kind);
            trace!(kind = %self.kind, "handler unregistered");
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::NewTermPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(router: &Router, kind: &str) -> (Registration, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        let registration = router.register(kind, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        (registration, hits)
    }

    #[test]
    fn routes_by_discriminator() {
        let router = Router::new();
        let (_end, end_hits) = counter(&router, "RACE_END");
        let (_term, term_hits) = counter(&router, "RACE_NEW_TERM");

        assert_eq!(router.dispatch(r#"{"$type":"RACE_END"}"#), Dispatch::Handled);
        assert_eq!(end_hits.load(Ordering::SeqCst), 1);
        assert_eq!(term_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_and_malformed_frames_touch_nothing() {
        let router = Router::new();
        let (_reg, hits) = counter(&router, "RACE_END");

        assert_eq!(router.dispatch(r#"{"$type":"RACE_PAUSE"}"#), Dispatch::Unhandled);
        assert_eq!(router.dispatch(r#"{"type":"RACE_END"}"#), Dispatch::Malformed);
        assert_eq!(router.dispatch("{not json"), Dispatch::Malformed);
        assert_eq!(router.dispatch(""), Dispatch::Malformed);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn last_registration_wins() {
        let router = Router::new();
        let (first, first_hits) = counter(&router, "RACE_END");
        let (_second, second_hits) = counter(&router, "RACE_END");

        router.dispatch(r#"{"$type":"RACE_END"}"#);
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);

        // The replaced token must not remove the newer handler.
        drop(first);
        assert!(router.is_registered("RACE_END"));
        router.dispatch(r#"{"$type":"RACE_END"}"#);
        assert_eq!(second_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_registration_unregisters() {
        let router = Router::new();
        let (reg, hits) = counter(&router, "GET_GAMES");
        assert_eq!(reg.kind(), "GET_GAMES");
        drop(reg);

        assert!(!router.is_registered("GET_GAMES"));
        assert_eq!(router.dispatch(r#"{"$type":"GET_GAMES"}"#), Dispatch::Unhandled);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registration_outliving_router_is_harmless() {
        let router = Router::new();
        let (reg, _hits) = counter(&router, "GET_GAMES");
        drop(router);
        drop(reg);
    }

    #[test]
    fn decoded_handler_skips_bad_payloads() {
        let router = Router::new();
        let terms = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&terms);
        let _reg = router.register_decoded("RACE_NEW_TERM", move |payload: NewTermPayload| {
            sink.lock().unwrap().push(payload.term);
        });

        router.dispatch(r#"{"$type":"RACE_NEW_TERM","term":"a"}"#);
        router.dispatch(r#"{"$type":"RACE_NEW_TERM","nope":1}"#);
        router.dispatch(r#"{"$type":"RACE_NEW_TERM","term":"b"}"#);
        assert_eq!(*terms.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
