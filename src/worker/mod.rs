//! The offline caching worker.
//!
//! A worker generation is tied to one pair of namespace versions. It is
//! installed (manifest pre-cached), activated (stale namespaces deleted,
//! clients claimed), and from then on intercepts requests cache-first.

mod fallback;
mod host;
mod intercept;
mod lifecycle;
mod outcome;
mod signals;

#[cfg(test)]
pub(crate) mod testing;

pub use host::LocalHost;
pub use lifecycle::{ServiceWorker, WorkerState};
pub use outcome::{FetchOutcome, ResponseSource};
pub use signals::Notification;
