//! Tracking consent state and change notification
//!
//! The consent value is the only piece of state shared across features. Reads are
//! lock-free; changes are serialized so every observer sees transitions in the same order.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// User-granted permission level for collected data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingConsent {
    /// Not decided yet: data is buffered but never uploaded
    Pending,
    /// Data may be buffered and uploaded
    Granted,
    /// Data must not be retained
    NotGranted,
}

impl fmt::Display for TrackingConsent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Granted => write!(f, "granted"),
            Self::NotGranted => write!(f, "not_granted"),
        }
    }
}

impl FromStr for TrackingConsent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "granted" => Ok(Self::Granted),
            "not_granted" | "notGranted" => Ok(Self::NotGranted),
            other => Err(format!("Unknown tracking consent: {}", other)),
        }
    }
}

/// Receives consent transitions
///
/// Called synchronously while the provider holds its change lock, so implementations
/// must only enqueue work and return.
pub trait ConsentObserver: Send + Sync {
    fn consent_changed(&self, previous: TrackingConsent, current: TrackingConsent);

    /// Observers reporting `false` are dropped at the next subscribe or change
    fn is_active(&self) -> bool {
        true
    }
}

/// Holder of the current consent value
pub struct ConsentProvider {
    current: ArcSwap<TrackingConsent>,
    observers: Mutex<Vec<Arc<dyn ConsentObserver>>>,
}

impl ConsentProvider {
    pub fn new(initial: TrackingConsent) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Current consent value
    pub fn current(&self) -> TrackingConsent {
        **self.current.load()
    }

    /// Register an observer and return the value it starts from
    ///
    /// Registration and the returned value are atomic with respect to `set`, so the
    /// observer sees every later transition and none that happened before.
    pub fn subscribe(&self, observer: Arc<dyn ConsentObserver>) -> TrackingConsent {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        observers.retain(|o| o.is_active());
        observers.push(observer);
        self.current()
    }

    /// Number of registered observers still active
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|o| o.is_active())
            .count()
    }

    /// Change the consent value and notify observers
    ///
    /// Returns the previous value. Setting the value already held does nothing.
    pub fn set(&self, consent: TrackingConsent) -> TrackingConsent {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        observers.retain(|o| o.is_active());

        let previous = self.current();
        if previous == consent {
            return previous;
        }

        self.current.store(Arc::new(consent));

        tracing::info!(
            previous = %previous,
            current = %consent,
            observers = observers.len(),
            "Tracking consent changed"
        );

        for observer in observers.iter() {
            observer.consent_changed(previous, consent);
        }

        previous
    }
}

impl fmt::Debug for ConsentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentProvider")
            .field("current", &self.current())
            .finish()
    }
}
