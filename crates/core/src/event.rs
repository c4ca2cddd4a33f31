use serde::{Deserialize, Serialize};

use crate::session::SessionKey;

/// Where an inbound event originated. Closed set: routing on anything but
/// `UserMessage` is a pure table lookup with no model involvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    StartRequest,
    UserMessage,
    HintRequest,
    SkipRequest,
    FinalSummaryRequest,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Source::StartRequest => "start_request",
            Source::UserMessage => "user_message",
            Source::HintRequest => "hint_request",
            Source::SkipRequest => "skip_request",
            Source::FinalSummaryRequest => "final_summary_request",
        };
        write!(f, "{s}")
    }
}

/// One inbound unit of work, transport-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub source: Source,
    pub payload: String,
}

impl Event {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

/// What the engine hands back for one processed event.
///
/// `degraded` is true only when a refinement loop behind this response
/// capped out and the text may not fully satisfy its structural constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    pub text: String,
    pub session_id: String,
    pub done: bool,
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_serializes_snake_case() {
        let json = serde_json::to_string(&Source::FinalSummaryRequest).unwrap();
        assert_eq!(json, "\"final_summary_request\"");

        let back: Source = serde_json::from_str("\"hint_request\"").unwrap();
        assert_eq!(back, Source::HintRequest);
    }

    #[test]
    fn source_rejects_unknown_tag() {
        let res: Result<Source, _> = serde_json::from_str("\"generate_button\"");
        assert!(res.is_err());
    }

    #[test]
    fn event_round_trip() {
        let event = Event {
            app_name: "parlando".into(),
            user_id: "u-1".into(),
            session_id: "s-1".into(),
            source: Source::UserMessage,
            payload: "I went to the market yesterday.".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, "s-1");
        assert_eq!(back.source, Source::UserMessage);
        assert_eq!(back.key().user_id, "u-1");
    }
}
