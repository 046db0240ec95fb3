//! UI-facing side of background work.

pub mod sink;

pub use sink::{PushMode, SinkDetached, UiContext, UiHandle, UiJob, UiSink};
