use std::net::SocketAddr;

use crate::rpc::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "staybook_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "staybook_command_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: reservation requests accepted into the store.
pub const REQUESTS_SUBMITTED_TOTAL: &str = "staybook_requests_submitted_total";

/// Counter: status transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "staybook_transitions_total";

/// Counter: periods or approvals refused by an overlapping reservation.
pub const CONFLICTS_TOTAL: &str = "staybook_conflicts_total";

/// Counter: notifications handed to the publisher. Labels: topic.
pub const NOTIFICATIONS_TOTAL: &str = "staybook_notifications_total";

/// Counter: notifications the publisher refused. Labels: topic.
pub const PUBLISH_FAILURES_TOTAL: &str = "staybook_publish_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staybook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staybook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staybook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateAccommodation { .. } => "create_accommodation",
        Command::UpdateAccommodation { .. } => "update_accommodation",
        Command::GetUnavailability { .. } => "get_unavailability",
        Command::ListUnavailability { .. } => "list_unavailability",
        Command::AddPeriod { .. } => "add_period",
        Command::ReleaseReservedSpan { .. } => "release_reserved_span",
        Command::DeleteOwnerBlock { .. } => "delete_owner_block",
        Command::IsAutoApprove { .. } => "is_auto_approve",
        Command::FilterAvailable { .. } => "filter_available",
        Command::DeleteHost { .. } => "delete_host",
        Command::SubmitRequest { .. } => "submit_request",
        Command::Approve { .. } => "approve",
        Command::Decline { .. } => "decline",
        Command::Cancel { .. } => "cancel",
        Command::GetRequest { .. } => "get_request",
        Command::RequestsByAccommodation { .. } => "requests_by_accommodation",
        Command::RequestsByClient { .. } => "requests_by_client",
        Command::FilteredRequests { .. } => "filtered_requests",
        Command::CountCanceled { .. } => "count_canceled",
        Command::GuestStayedWithHost { .. } => "guest_stayed_with_host",
        Command::GuestHasReservation { .. } => "guest_has_reservation",
        Command::DeleteRequest { .. } => "delete_request",
        Command::DeleteClient { .. } => "delete_client",
        Command::CanDeleteAccommodation { .. } => "can_delete_accommodation",
        Command::Subscribe { .. } => "subscribe",
    }
}
