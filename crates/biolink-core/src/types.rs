use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// One line of a [`DebugTrace`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Wall-clock time the event was recorded.
    pub at: DateTime<Utc>,

    /// Human-readable event description.
    pub message: String,
}

/// Ordered diagnostic log accumulated across one operation.
///
/// The trace is append-only. It is returned to the host alongside every
/// error so a failed scan can be diagnosed without access to the device
/// logs. Each pushed line is mirrored to `tracing` at debug level.
///
/// # Examples
///
/// ```
/// use biolink_core::DebugTrace;
///
/// let mut trace = DebugTrace::new();
/// trace.push("Requesting USB permission");
/// trace.push("USB permission result: granted=true");
///
/// assert_eq!(trace.len(), 2);
/// assert!(trace.contains("granted=true"));
/// assert_eq!(
///     trace.render(),
///     "Requesting USB permission\nUSB permission result: granted=true"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugTrace {
    entries: Vec<TraceEntry>,
}

impl DebugTrace {
    /// Create an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target: "biolink::trace", "{}", message);
        self.entries.push(TraceEntry {
            at: Utc::now(),
            message,
        });
    }

    /// Append every entry of another trace, keeping their timestamps.
    pub fn extend(&mut self, other: DebugTrace) {
        for entry in &other.entries {
            tracing::debug!(target: "biolink::trace", "{}", entry.message);
        }
        self.entries.extend(other.entries);
    }

    /// All entries in recording order.
    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }

    /// Number of entries containing `needle`.
    #[must_use]
    pub fn count(&self, needle: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.message.contains(needle))
            .count()
    }

    /// Render the messages one per line, without timestamps.
    #[must_use]
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for DebugTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{} {}", entry.at.format("%H:%M:%S%.3f"), entry.message)?;
        }
        Ok(())
    }
}

/// Absolute time bound attached to an operation.
///
/// Built on the monotonic tokio clock so it composes with
/// `tokio::time::timeout_at` and `sleep_until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    /// A deadline at a specific instant.
    #[must_use]
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// The underlying instant.
    #[must_use]
    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// Whether the bound has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Clamp a sub-budget so it never runs past this deadline.
    #[must_use]
    pub fn cap(&self, budget: Duration) -> Duration {
        budget.min(self.remaining())
    }

    /// A deadline for a sub-step: `budget` from now, but never later than `self`.
    #[must_use]
    pub fn child(&self, budget: Duration) -> Deadline {
        Deadline(self.0.min(Instant::now() + budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_is_ordered() {
        let mut trace = DebugTrace::new();
        trace.push("first");
        trace.push("second");
        trace.push("third");

        let messages: Vec<_> = trace.entries().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_trace_extend_appends() {
        let mut outer = DebugTrace::new();
        outer.push("outer");

        let mut inner = DebugTrace::new();
        inner.push("inner 1");
        inner.push("inner 2");

        outer.extend(inner);
        assert_eq!(outer.render(), "outer\ninner 1\ninner 2");
    }

    #[test]
    fn test_trace_count() {
        let mut trace = DebugTrace::new();
        trace.push("Attempt #1");
        trace.push("Attempt #2");
        trace.push("Got 512 bytes from attempt #2");

        assert_eq!(trace.count("Attempt #"), 2);
        assert!(!trace.is_empty());
    }

    #[test]
    fn test_trace_display_has_timestamps() {
        let mut trace = DebugTrace::new();
        trace.push("opened");
        let rendered = trace.to_string();
        assert!(rendered.ends_with("opened\n"));
        assert!(rendered.contains(':'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let deadline = Deadline::after(Duration::from_millis(100));
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(deadline.cap(Duration::from_secs(1)), Duration::from_millis(40));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_never_exceeds_parent() {
        let parent = Deadline::after(Duration::from_millis(500));
        let short = parent.child(Duration::from_millis(100));
        let long = parent.child(Duration::from_secs(5));

        assert!(short < parent);
        assert_eq!(long, parent);
    }
}
