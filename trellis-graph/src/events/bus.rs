// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;

use futures_util::Stream;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use trellis_auth::{AuthError, AuthorizationService, PermissionEvaluator};
use trellis_core::traits::WorkspaceLookup;
use trellis_core::{Permission, UserId, WorkspaceId};

use crate::events::fanout::EventPublisher;
use crate::events::{Event, Topic};

/// Decides if a user may (still) receive events of a workspace.
pub trait SubscriptionGate {
    fn validate(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> impl Future<Output = Result<bool, AuthError>>;
}

/// Subscribers need to be able to read the workspace.
impl<W, E> SubscriptionGate for AuthorizationService<W, E>
where
    W: WorkspaceLookup,
    E: PermissionEvaluator,
{
    async fn validate(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> Result<bool, AuthError> {
        self.has_access(user_id, workspace_id, &Permission::WORKSPACE_READ)
            .await
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("not allowed to subscribe to events of workspace {0}")]
    Denied(WorkspaceId),

    #[error(transparent)]
    Gate(#[from] AuthError),
}

/// In-process event broadcast.
///
/// Every published event is offered to every subscription. Subscriptions filter by workspace and
/// topic and re-validate their subscriber before handing out an event. Slow subscribers missing
/// more than `capacity` events skip the oldest ones.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe a user to events of the given topics in a workspace.
    ///
    /// Fails if the gate does not allow the user to receive events of this workspace.
    pub async fn subscribe<G>(
        &self,
        gate: G,
        user_id: UserId,
        workspace_id: WorkspaceId,
        topics: impl IntoIterator<Item = Topic>,
    ) -> Result<Subscription<G>, SubscribeError>
    where
        G: SubscriptionGate,
    {
        if !gate.validate(&workspace_id, &user_id).await? {
            return Err(SubscribeError::Denied(workspace_id));
        }

        Ok(Subscription {
            user_id,
            workspace_id,
            topics: topics.into_iter().collect(),
            gate,
            rx: Some(self.tx.subscribe()),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for EventBus {
    async fn publish(&self, event: Event) -> Result<(), PublishError> {
        // Sending only fails when nobody is listening, which is not an error for us.
        if self.tx.send(event).is_err() {
            debug!("published event without subscribers");
        }
        Ok(())
    }
}

/// Events of one workspace delivered to one user.
///
/// The subscription closes for good as soon as the user fails re-validation, the gate errors or
/// the bus is dropped.
pub struct Subscription<G> {
    user_id: UserId,
    workspace_id: WorkspaceId,
    topics: HashSet<Topic>,
    gate: G,
    rx: Option<broadcast::Receiver<Event>>,
}

impl<G> std::fmt::Debug for Subscription<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("user_id", &self.user_id)
            .field("workspace_id", &self.workspace_id)
            .field("topics", &self.topics)
            .field("closed", &self.rx.is_none())
            .finish_non_exhaustive()
    }
}

impl<G> Subscription<G>
where
    G: SubscriptionGate,
{
    /// Wait for the next event of this subscription, `None` once it closed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            let rx = self.rx.as_mut()?;
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user = %self.user_id, skipped, "subscriber lagged behind");
                    continue;
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            };

            if event.workspace_id() != &self.workspace_id || !self.topics.contains(&event.topic()) {
                continue;
            }

            match self.gate.validate(&self.workspace_id, &self.user_id).await {
                Ok(true) => return Some(event),
                Ok(false) => {
                    warn!(
                        user = %self.user_id,
                        workspace = %self.workspace_id,
                        "subscriber lost access, closing subscription"
                    );
                }
                Err(err) => {
                    warn!(
                        user = %self.user_id,
                        workspace = %self.workspace_id,
                        %err,
                        "could not validate subscriber, closing subscription"
                    );
                }
            }

            self.rx = None;
            return None;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.workspace_id
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> {
        futures_util::stream::unfold(self, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}
