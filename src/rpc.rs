//! Line-oriented JSON protocol: one [`Command`] object per request line, one
//! [`Reply`] object per response line. Subscribed notifications arrive as
//! unsolicited `event` replies.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::BookingError;
use crate::model::*;
use crate::notify::{Notification, Topic};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    // ── Availability ledger ──
    CreateAccommodation {
        accommodation_id: Ulid,
        name: String,
        host_id: Ulid,
        #[serde(default)]
        auto_approve: bool,
    },
    UpdateAccommodation {
        accommodation_id: Ulid,
        name: String,
        host_id: Ulid,
        #[serde(default)]
        auto_approve: bool,
    },
    GetUnavailability {
        accommodation_id: Ulid,
    },
    ListUnavailability {
        #[serde(default)]
        host_id: Option<Ulid>,
    },
    AddPeriod {
        accommodation_id: Ulid,
        span: Span,
        reason: Reason,
    },
    ReleaseReservedSpan {
        accommodation_id: Ulid,
        span: Span,
    },
    DeleteOwnerBlock {
        accommodation_id: Ulid,
        span: Span,
    },
    IsAutoApprove {
        accommodation_id: Ulid,
    },
    FilterAvailable {
        accommodation_ids: Vec<Ulid>,
        span: Span,
    },
    DeleteHost {
        host_id: Ulid,
    },

    // ── Reservation workflow ──
    SubmitRequest {
        accommodation_id: Ulid,
        user_id: Ulid,
        span: Span,
        guest_count: u32,
        total_price: f64,
    },
    Approve {
        request_id: Ulid,
    },
    Decline {
        request_id: Ulid,
    },
    Cancel {
        request_id: Ulid,
    },
    GetRequest {
        request_id: Ulid,
    },
    RequestsByAccommodation {
        accommodation_id: Ulid,
        #[serde(default)]
        status: Option<RequestStatus>,
    },
    RequestsByClient {
        user_id: Ulid,
        #[serde(default)]
        status: Option<RequestStatus>,
    },
    FilteredRequests {
        user_id: Ulid,
        role: Role,
        #[serde(default)]
        past: bool,
        #[serde(default)]
        search: Option<String>,
    },
    CountCanceled {
        user_id: Ulid,
    },
    GuestStayedWithHost {
        guest_id: Ulid,
        host_id: Ulid,
    },
    GuestHasReservation {
        guest_id: Ulid,
        accommodation_id: Ulid,
    },
    DeleteRequest {
        request_id: Ulid,
    },
    DeleteClient {
        user_id: Ulid,
    },
    CanDeleteAccommodation {
        accommodation_id: Ulid,
    },

    // ── Session ──
    Subscribe {
        topic: Topic,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok { data: serde_json::Value },
    Error { code: String, message: String },
    Event { topic: Topic, payload: Notification },
}

impl Reply {
    pub fn error(err: &BookingError) -> Self {
        Reply::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn bad_request(message: impl std::fmt::Display) -> Self {
        Reply::Error {
            code: "bad_request".to_string(),
            message: message.to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","code":"internal","message":"reply encoding failed: {e}"}}"#)
        })
    }
}

pub fn parse_command(line: &str) -> Result<Command, serde_json::Error> {
    serde_json::from_str(line.trim())
}
