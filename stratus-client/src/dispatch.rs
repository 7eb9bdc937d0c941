use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc::UnboundedSender;

use crate::credentials::CredentialProvider;
use crate::error::ApiError;
use crate::events::Event;
use crate::registry::{Handle, Registry};
use crate::transport::{Reply, TransportError};
use stratus_core::wire;

/// A successfully interpreted transport outcome. `NotModified` is the
/// third success shape used by conditional metadata reads.
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    Parsed(T),
    NotModified,
}

/// Drives every operation through
/// `TransportDone -> {ParseFailed, AuthFailed, Parsed} -> notify -> remove`.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    events: UnboundedSender<Event>,
    credentials: Arc<dyn CredentialProvider>,
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub(crate) fn new(
        events: UnboundedSender<Event>,
        credentials: Arc<dyn CredentialProvider>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            events,
            credentials,
            registry,
        }
    }

    /// Interprets a raw transport result into a typed outcome. The JSON
    /// decode runs on a worker, never on the issuing context.
    ///
    /// A service 401 fires the re-authorization hook first; the original
    /// failure is still surfaced afterwards.
    pub(crate) async fn interpret<T>(
        &self,
        reply: Result<Reply, TransportError>,
    ) -> Result<Outcome<T>, ApiError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let reply = reply?;
        match reply.status {
            304 => Ok(Outcome::NotModified),
            401 => {
                self.credentials.on_authorization_failure();
                Err(ApiError::AuthenticationFailed { status: 401 })
            }
            status if (200..300).contains(&status) => {
                let body = reply.body;
                let parsed = tokio::task::spawn_blocking(move || wire::decode::<T>(&body))
                    .await
                    .map_err(|err| ApiError::Worker(err.to_string()))?;
                match parsed {
                    Ok(value) => Ok(Outcome::Parsed(value)),
                    Err(err) => {
                        tracing::warn!(status, error = %err, "response body did not decode");
                        Err(ApiError::InvalidResponse(err))
                    }
                }
            }
            status => Err(ApiError::Api {
                status,
                body: String::from_utf8_lossy(&reply.body).into_owned(),
            }),
        }
    }

    /// Like `interpret` but for operations whose success carries no decoded
    /// body (streamed downloads).
    pub(crate) fn interpret_raw(&self, reply: Result<Reply, TransportError>) -> Result<(), ApiError> {
        let reply = reply?;
        match reply.status {
            401 => {
                self.credentials.on_authorization_failure();
                Err(ApiError::AuthenticationFailed { status: 401 })
            }
            status if (200..300).contains(&status) => Ok(()),
            status => Err(ApiError::Api {
                status,
                body: String::from_utf8_lossy(&reply.body).into_owned(),
            }),
        }
    }

    /// Removes the operation and delivers its terminal event, unless the
    /// operation was cancelled, in which case the entry is dropped
    /// silently. The cancellation check and the send happen under the
    /// registry lock, so a concurrent `cancel_all` either runs before the
    /// send (and suppresses it) or after (and the event was already
    /// queued). Called exactly once per operation.
    pub(crate) fn deliver(&self, handle: &Handle, event: Event) {
        let events = self.events.clone();
        let delivered = self.registry.complete_with(handle, move || {
            let _ = events.send(event);
        });
        if !delivered {
            tracing::debug!(id = %handle.id, "dropping event for cancelled operation");
        }
    }

    /// Removes a cancelled operation without notifying anyone.
    pub(crate) fn drop_silently(&self, handle: &Handle) {
        self.registry.complete(handle);
        tracing::debug!(id = %handle.id, "operation cancelled before completion");
    }
}
