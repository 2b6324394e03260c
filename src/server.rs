use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::error::BookingError;
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::notify::Topic;
use crate::observability;
use crate::rpc::{self, Command, Reply};
use crate::service::BookingService;

const EVENT_BUFFER: usize = 256;

fn data<T: Serialize>(value: T) -> Result<Value, BookingError> {
    serde_json::to_value(value).map_err(|e| BookingError::Storage(format!("encode reply: {e}")))
}

/// Run one command against the service. `Subscribe` is session state and is
/// handled by the connection loop, not here.
pub async fn execute(service: &BookingService, cmd: Command) -> Result<Value, BookingError> {
    let ledger = &service.ledger;
    let workflow = &service.workflow;
    match cmd {
        Command::CreateAccommodation {
            accommodation_id,
            name,
            host_id,
            auto_approve,
        } => data(ledger.create(accommodation_id, &name, host_id, auto_approve).await?),
        Command::UpdateAccommodation {
            accommodation_id,
            name,
            host_id,
            auto_approve,
        } => data(ledger.update(accommodation_id, &name, host_id, auto_approve).await?),
        Command::GetUnavailability { accommodation_id } => {
            let entry = ledger
                .get(accommodation_id)
                .await?
                .ok_or(BookingError::NotFound(accommodation_id))?;
            data(entry)
        }
        Command::ListUnavailability { host_id } => match host_id {
            Some(host_id) => data(ledger.by_host(host_id).await?),
            None => data(ledger.list().await?),
        },
        Command::AddPeriod {
            accommodation_id,
            span,
            reason,
        } => data(ledger.add_period(accommodation_id, span, reason).await?),
        Command::ReleaseReservedSpan { accommodation_id, span } => {
            data(ledger.release_reserved_span(accommodation_id, span).await?)
        }
        Command::DeleteOwnerBlock { accommodation_id, span } => {
            data(ledger.delete_owner_block(accommodation_id, span).await?)
        }
        Command::IsAutoApprove { accommodation_id } => data(ledger.is_auto_approve(accommodation_id).await?),
        Command::FilterAvailable { accommodation_ids, span } => {
            data(ledger.filter_available(&accommodation_ids, span).await?)
        }
        Command::DeleteHost { host_id } => data(ledger.delete_host(host_id).await?),

        Command::SubmitRequest {
            accommodation_id,
            user_id,
            span,
            guest_count,
            total_price,
        } => {
            let new = NewReservationRequest {
                accommodation_id,
                user_id,
                span,
                guest_count,
                total_price,
            };
            data(workflow.submit(new).await?)
        }
        Command::Approve { request_id } => data(workflow.approve(request_id).await?),
        Command::Decline { request_id } => data(workflow.decline(request_id).await?),
        Command::Cancel { request_id } => data(workflow.cancel_by_guest(request_id).await?),
        Command::GetRequest { request_id } => data(workflow.get(request_id).await?),
        Command::RequestsByAccommodation {
            accommodation_id,
            status,
        } => data(workflow.by_accommodation(accommodation_id, status).await?),
        Command::RequestsByClient { user_id, status } => data(workflow.by_client(user_id, status).await?),
        Command::FilteredRequests {
            user_id,
            role,
            past,
            search,
        } => data(workflow.filtered(user_id, role, past, search.as_deref()).await?),
        Command::CountCanceled { user_id } => data(workflow.count_canceled_by_client(user_id).await?),
        Command::GuestStayedWithHost { guest_id, host_id } => {
            data(workflow.guest_has_stayed_with_host(guest_id, host_id).await?)
        }
        Command::GuestHasReservation {
            guest_id,
            accommodation_id,
        } => data(
            workflow
                .guest_has_reservation_for_accommodation(guest_id, accommodation_id)
                .await?,
        ),
        Command::DeleteRequest { request_id } => {
            workflow.delete_request(request_id).await?;
            Ok(Value::Null)
        }
        Command::DeleteClient { user_id } => data(workflow.delete_client(user_id).await?),
        Command::CanDeleteAccommodation { accommodation_id } => {
            data(workflow.can_delete_accommodation(accommodation_id).await?)
        }
        Command::Subscribe { .. } => Err(BookingError::InvalidInput("subscribe is a session command")),
    }
}

async fn execute_timed(service: &BookingService, cmd: Command) -> Reply {
    let label = observability::command_label(&cmd);
    let start = Instant::now();
    let result = execute(service, cmd).await;
    metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => label)
        .record(start.elapsed().as_secs_f64());
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(observability::COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);
    match result {
        Ok(data) => Reply::Ok { data },
        Err(e) => {
            debug!("{label} failed: {e}");
            Reply::error(&e)
        }
    }
}

/// Relay one hub topic into the connection's event queue until either side goes away.
fn spawn_forwarder(service: &BookingService, topic: Topic, events: mpsc::Sender<Reply>) -> JoinHandle<()> {
    let mut rx = service.notify.subscribe(topic);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    if events.send(Reply::Event { topic, payload }).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("subscriber on {topic} lagged, {skipped} notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, service: Arc<BookingService>) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (event_tx, mut event_rx) = mpsc::channel::<Reply>(EVENT_BUFFER);
    let mut subscribed: HashSet<Topic> = HashSet::new();
    let mut forwarders: Vec<JoinHandle<()>> = Vec::new();

    let result = loop {
        tokio::select! {
            incoming = framed.next() => {
                let line = match incoming {
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let reply = Reply::bad_request("line too long");
                        if let Err(e) = framed.send(reply.to_line()).await {
                            break Err(e);
                        }
                        continue;
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                };
                if line.trim().is_empty() {
                    continue;
                }

                let reply = match rpc::parse_command(&line) {
                    Ok(Command::Subscribe { topic }) => {
                        if subscribed.insert(topic) {
                            forwarders.push(spawn_forwarder(&service, topic, event_tx.clone()));
                        }
                        Reply::Ok { data: json!({ "subscribed": topic }) }
                    }
                    Ok(cmd) => execute_timed(&service, cmd).await,
                    Err(e) => Reply::bad_request(e),
                };
                if let Err(e) = framed.send(reply.to_line()).await {
                    break Err(e);
                }
            }
            Some(event) = event_rx.recv() => {
                if let Err(e) = framed.send(event.to_line()).await {
                    break Err(e);
                }
            }
        }
    };

    for forwarder in forwarders {
        forwarder.abort();
    }
    result
}
