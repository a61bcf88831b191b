//! Monitoring Module
//!
//! Provides the logging call sites used by steps and the timeline of
//! instance creation and console streaming.
//!
//! # Components
//!
//! - [`LogSink`]: Step messages and finished serial console logs
//! - [`ExecutionTimeline`]: Instance start/end timing for Gantt charts

pub mod sink;
pub mod timeline;

pub use sink::{ConsoleLogSink, LogSink};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
