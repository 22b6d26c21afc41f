//! Browser control over the remote-debugging protocol.
//!
//! A [`BrowserSession`] owns one Chromium instance (launched or attached)
//! and turns one navigation into a [`crate::models::Page`]: the event
//! collector buffers the debugger's network/runtime streams while the page
//! loads, and the correlator folds them into the ordered action list.

mod correlate;
mod events;
mod session;

pub use correlate::actions_from_events;
pub use events::{BodyEvent, BrowserEvents, FailureEvent, RequestEvent, ResponseEvent};
pub use session::BrowserSession;
