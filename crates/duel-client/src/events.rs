//! UI-facing side effects published by the duel core.
//!
//! The core never renders or routes by itself; it emits these events on an
//! unbounded channel handed to the consuming view at construction time.

use duel_proto::SubmissionResult;

/// Client-visible routes the core drives navigation to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The live duel arena for a duel id.
    Arena(String),
    /// The completion/result view for a duel id.
    Completion(String),
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Events the consuming view reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Notify {
        level: NoticeLevel,
        message: String,
    },
    Navigate(Route),
    /// The single canonical submission/test outcome, whichever source
    /// (HTTP reply or realtime push) produced it.
    SubmissionResult(SubmissionResult),
}

impl UiEvent {
    pub fn info(message: impl Into<String>) -> Self {
        UiEvent::Notify {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        UiEvent::Notify {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        UiEvent::Notify {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        UiEvent::Notify {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}
