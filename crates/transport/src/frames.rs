//! Event stream frame types and parser.
//!
//! The backend sends JSON text frames shaped `{"type": "<kind>", "data":
//! {...}}`. Only `progress` frames carry data; `heartbeat` frames exist
//! to keep intermediaries from closing an idle connection.

use serde::Deserialize;
use trendscope_core::event::ProgressEvent;

/// All known frames on the event stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerFrame {
    /// A job progress snapshot.
    #[serde(rename = "progress")]
    Progress(Box<ProgressEvent>),

    /// Keep-alive; carries nothing of interest.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Parse a text frame into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// discard those frames and continue.
pub fn parse_frame(text: &str) -> Result<ServerFrame, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use trendscope_core::phase::{JobKind, JobPhase};

    use super::*;

    #[test]
    fn parse_progress_frame() {
        let json = r#"{"type":"progress","data":{"key":{"type":"bulk","kind":"bulk_download","job_id":4},"phase":"downloading","sequence":12,"total":3,"completed":1}}"#;
        match parse_frame(json).unwrap() {
            ServerFrame::Progress(event) => {
                assert_eq!(event.kind(), JobKind::BulkDownload);
                assert_eq!(event.phase, JobPhase::Downloading);
                assert_eq!(event.sequence, 12);
                assert_eq!(event.completed, 1);
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn parse_heartbeat_frame() {
        let json = r#"{"type":"heartbeat"}"#;
        assert!(matches!(parse_frame(json).unwrap(), ServerFrame::Heartbeat));
    }

    #[test]
    fn parse_unknown_type_returns_error() {
        let json = r#"{"type":"presence","data":{}}"#;
        assert!(parse_frame(json).is_err());
    }

    #[test]
    fn parse_progress_without_key_returns_error() {
        let json = r#"{"type":"progress","data":{"phase":"queued","sequence":1}}"#;
        assert!(parse_frame(json).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_frame(": ping").is_err());
    }
}
