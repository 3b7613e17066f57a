//! Message dispatch.
//!
//! Routes each inbox message to its handler in [`crate::handlers`] and answers
//! on the reply port when the message type has a reply.

use folio_core::broker::Envelope;
use folio_core::{WorkerReply, WorkerRequest};

use crate::handlers::{books, cache, state};
use crate::worker::Worker;

/// Handle one message, replying at most once.
pub async fn dispatch(worker: &Worker, envelope: Envelope) {
    let Envelope { message, reply } = envelope;
    let request = message.type_name();
    tracing::debug!(request, "handling message");

    match (handle(worker, message).await, reply) {
        (Some(answer), Some(port)) => {
            if !port.send(answer) {
                tracing::debug!(request, "caller stopped waiting before the reply");
            }
        }
        (Some(_), None) => tracing::debug!(request, "reply discarded: message was posted"),
        (None, Some(_)) => tracing::debug!(request, "message has no reply; dropping reply port"),
        (None, None) => {}
    }
}

/// Perform a request. Returns the reply for request types that have one.
pub async fn handle(worker: &Worker, message: WorkerRequest) -> Option<WorkerReply> {
    match message {
        WorkerRequest::GetCachedBooks => Some(books::list_impl(worker).await),
        WorkerRequest::CacheBookPdf { url, content } => Some(books::cache_impl(worker, &url, content).await),
        WorkerRequest::DeleteCachedBook { url } => Some(books::delete_impl(worker, &url).await),
        WorkerRequest::UpdateSwState { key, value } => {
            state::update_impl(worker, key, value).await;
            None
        }
        WorkerRequest::ClearCache => {
            cache::clear_impl(worker).await;
            None
        }
        WorkerRequest::SkipWaiting => {
            worker.skip_waiting().await;
            None
        }
    }
}
