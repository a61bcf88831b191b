//! Instance Timeline
//!
//! Records when each instance's creation and console streaming start
//! and end. Creation tasks and log streamers report from their own
//! threads, so the timeline locks internally.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Kind of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Creation call issued
    Creating,
    /// Provider accepted the instance
    Created,
    /// Provider rejected the instance
    CreateFailed,
    /// Serial console streaming began
    StreamStarted,
    /// Serial console streaming stopped
    StreamEnded,
}

/// A single event in the timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub instance: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Timing of one instance, in milliseconds since the timeline started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Span {
    start: u128,
    created: Option<u128>,
    end: u128,
}

/// Thread-safe timeline of instance events.
#[derive(Debug)]
pub struct ExecutionTimeline {
    events: Mutex<Vec<TimelineEvent>>,
    start_time: Instant,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    /// Records an event for an instance.
    pub fn add_event(&self, instance: &str, event_type: EventType) {
        self.lock().push(TimelineEvent {
            instance: instance.to_string(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns a copy of all recorded events.
    pub fn events(&self) -> Vec<TimelineEvent> {
        self.lock().clone()
    }

    /// Number of recorded events of the given kind.
    pub fn count(&self, event_type: EventType) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Creation call durations, for instances whose call has returned.
    pub fn creation_durations(&self) -> BTreeMap<String, Duration> {
        let events = self.lock();
        let mut starts: BTreeMap<&str, Instant> = BTreeMap::new();
        let mut durations = BTreeMap::new();

        for event in events.iter() {
            match event.event_type {
                EventType::Creating => {
                    starts.insert(&event.instance, event.timestamp);
                }
                EventType::Created | EventType::CreateFailed => {
                    if let Some(start) = starts.get(event.instance.as_str()) {
                        durations.insert(
                            event.instance.clone(),
                            event.timestamp.duration_since(*start),
                        );
                    }
                }
                EventType::StreamStarted | EventType::StreamEnded => {}
            }
        }

        durations
    }

    /// Generates an ASCII Gantt chart.
    ///
    /// Each instance gets one bar: `=` while its creation call runs and
    /// `#` while its console is streamed.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nInstance Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut spans: BTreeMap<String, Span> = BTreeMap::new();
        for event in self.lock().iter() {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            let span = spans.entry(event.instance.clone()).or_insert(Span {
                start: elapsed,
                created: None,
                end: elapsed,
            });

            if event.event_type == EventType::Created {
                span.created = Some(elapsed);
            }
            span.end = span.end.max(elapsed);
        }

        let mut sorted: Vec<_> = spans.into_iter().collect();
        sorted.sort_by_key(|(_, span)| span.start);

        for (instance, span) in sorted {
            let column = |ms: u128| (ms as f64 * scale) as usize;
            let start_pos = column(span.start);
            let created_pos = column(span.created.unwrap_or(span.end)).max(start_pos + 1);
            let end_pos = column(span.end).max(created_pos);

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"=".repeat(created_pos - start_pos));
            bar.push_str(&"#".repeat(end_pos - created_pos));

            output.push_str(&format!(
                "{:16} |{:50}| ({} ms)\n",
                truncate(&instance, 16),
                bar,
                span.end - span.start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TimelineEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a string to a fixed width.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
