//! Event naming, pattern matching, and per-fire value types.
//!
//! Event names are exactly three `:`-separated segments,
//! `namespace:type:target`, all non-empty and non-wildcard at dispatch time.
//! Subscription patterns share the grammar but may substitute any segment
//! with `*`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// Number of segments in an event name or pattern.
const SEGMENTS: usize = 3;

/// The three fixed stages every dispatch passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Before,
    On,
    After,
}

impl Phase {
    /// Dispatch order.
    pub const ALL: [Phase; 3] = [Phase::Before, Phase::On, Phase::After];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::On => "on",
            Phase::After => "after",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while parsing names or compiling patterns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventNameError {
    #[error("event name `{0}` must have exactly three `:`-separated segments")]
    WrongSegmentCount(String),

    #[error("event name `{0}` has an empty segment")]
    EmptySegment(String),

    #[error("event name `{0}` contains a wildcard; wildcards are subscription-only")]
    WildcardAtDispatch(String),

    #[error("pattern `{0}` must have exactly three `:`-separated segments")]
    BadPattern(String),

    #[error("pattern `{0}` has an empty segment; use `*` to match anything")]
    EmptyPatternSegment(String),
}

/// A parsed, dispatch-valid three-part event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EventName {
    pub namespace: String,
    pub kind: String,
    pub target: String,
}

impl EventName {
    /// Parse and validate a dispatch-time name.
    ///
    /// All three segments must be present, non-empty, and must not be the
    /// `*` wildcard.
    pub fn parse(raw: &str) -> Result<Self, EventNameError> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != SEGMENTS {
            return Err(EventNameError::WrongSegmentCount(raw.to_string()));
        }
        for part in &parts {
            if part.is_empty() {
                return Err(EventNameError::EmptySegment(raw.to_string()));
            }
            if *part == "*" {
                return Err(EventNameError::WildcardAtDispatch(raw.to_string()));
            }
        }
        Ok(Self {
            namespace: parts[0].to_string(),
            kind: parts[1].to_string(),
            target: parts[2].to_string(),
        })
    }

    /// The canonical `namespace:type:target` spelling.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.kind, self.target)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.kind, self.target)
    }
}

/// A compiled subscription pattern.
///
/// Wildcard segments compile to `None` and match anything; literal segments
/// match by exact equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    segments: [Option<String>; SEGMENTS],
}

impl Pattern {
    pub fn compile(raw: &str) -> Result<Self, EventNameError> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != SEGMENTS {
            return Err(EventNameError::BadPattern(raw.to_string()));
        }
        let mut segments: [Option<String>; SEGMENTS] = [None, None, None];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                return Err(EventNameError::EmptyPatternSegment(raw.to_string()));
            }
            segments[i] = if *part == "*" {
                None
            } else {
                Some(part.to_string())
            };
        }
        Ok(Self { segments })
    }

    pub fn matches(&self, name: &EventName) -> bool {
        let actual = [&name.namespace, &name.kind, &name.target];
        self.segments
            .iter()
            .zip(actual)
            .all(|(segment, value)| match segment {
                None => true,
                Some(literal) => literal == value,
            })
    }
}

/// Control-flow directive returned by a handler.
///
/// Replaces in-place mutation of event flags: the bus folds each handler's
/// flow into the fire's `cancelled` / stop-phase state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flow {
    /// Suppress the `on` phase of the current fire.
    pub cancel: bool,
    /// Skip the remaining handlers of the current phase only.
    pub stop_phase: bool,
}

impl Flow {
    pub const CONTINUE: Flow = Flow {
        cancel: false,
        stop_phase: false,
    };
    pub const CANCEL: Flow = Flow {
        cancel: true,
        stop_phase: false,
    };
    pub const STOP_PHASE: Flow = Flow {
        cancel: false,
        stop_phase: true,
    };
    pub const CANCEL_AND_STOP: Flow = Flow {
        cancel: true,
        stop_phase: true,
    };
}

/// One failed handler, recorded on the fire it failed in.
#[derive(Debug, Clone, Serialize)]
pub struct EventError {
    pub phase: Phase,
    /// Call-site label of the failing handler.
    pub scope: String,
    pub message: String,
}

/// Snapshot handed to each handler at invocation time.
///
/// `cancelled` and `errors` reflect the fire's state when the handler starts;
/// `after`-phase handlers are the only ones guaranteed to observe the final
/// state of the `before` and `on` phases.
#[derive(Debug, Clone)]
pub struct EventView {
    pub name: EventName,
    pub phase: Phase,
    pub payload: Arc<Value>,
    pub cancelled: bool,
    pub errors: Vec<EventError>,
}

/// Fully-resolved result of one fire, returned to awaited callers.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    /// Raw name as supplied to `fire`; kept verbatim so protocol errors can
    /// report the offending spelling.
    pub name: String,
    pub payload: Value,
    pub cancelled: bool,
    pub errors: Vec<EventError>,
}

impl EventOutcome {
    pub fn ok(&self) -> bool {
        !self.cancelled && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_name() {
        let name = EventName::parse("widget:click:cell").unwrap();
        assert_eq!(name.namespace, "widget");
        assert_eq!(name.kind, "click");
        assert_eq!(name.target, "cell");
        assert_eq!(name.key(), "widget:click:cell");
    }

    #[test]
    fn test_parse_rejects_wrong_segment_count() {
        assert!(matches!(
            EventName::parse("widget:click"),
            Err(EventNameError::WrongSegmentCount(_))
        ));
        assert!(matches!(
            EventName::parse("a:b:c:d"),
            Err(EventNameError::WrongSegmentCount(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_segment() {
        assert!(matches!(
            EventName::parse("widget::cell"),
            Err(EventNameError::EmptySegment(_))
        ));
        assert!(matches!(
            EventName::parse("widget:click:"),
            Err(EventNameError::EmptySegment(_))
        ));
    }

    #[test]
    fn test_parse_rejects_dispatch_time_wildcard() {
        assert!(matches!(
            EventName::parse("widget:*:cell"),
            Err(EventNameError::WildcardAtDispatch(_))
        ));
    }

    #[test]
    fn test_pattern_literal_match() {
        let pattern = Pattern::compile("widget:click:cell").unwrap();
        assert!(pattern.matches(&EventName::parse("widget:click:cell").unwrap()));
        assert!(!pattern.matches(&EventName::parse("widget:click:row").unwrap()));
    }

    #[test]
    fn test_pattern_wildcard_segments() {
        let pattern = Pattern::compile("widget:*:*").unwrap();
        assert!(pattern.matches(&EventName::parse("widget:click:cell").unwrap()));
        assert!(pattern.matches(&EventName::parse("widget:status:ready").unwrap()));
        assert!(!pattern.matches(&EventName::parse("service:click:cell").unwrap()));

        let all = Pattern::compile("*:*:*").unwrap();
        assert!(all.matches(&EventName::parse("a:b:c").unwrap()));
    }

    #[test]
    fn test_pattern_rejects_bad_shapes() {
        assert!(Pattern::compile("widget:click").is_err());
        assert!(Pattern::compile("widget::cell").is_err());
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(Phase::ALL, [Phase::Before, Phase::On, Phase::After]);
    }
}
