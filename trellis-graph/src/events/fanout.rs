// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};
use trellis_core::{Card, CardId, Connection, ConnectionId, WorkspaceId};

use crate::events::Event;
use crate::events::bus::PublishError;

/// Transport receiving published events.
pub trait EventPublisher {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), PublishError>>;
}

/// Workspace every connection belongs to, captured while its cards can still be looked up.
///
/// A connection is routed to the workspace of its source card. The scope has to be resolved
/// _before_ a connection is deleted, afterwards there is no trustworthy way to find out where
/// the event belongs.
#[derive(Clone, Debug, Default)]
pub struct ConnectionScope(HashMap<ConnectionId, WorkspaceId>);

impl ConnectionScope {
    pub fn resolve<'a>(
        connections: impl IntoIterator<Item = &'a Connection>,
        cards: &HashMap<CardId, Card>,
    ) -> Self {
        Self(
            connections
                .into_iter()
                .filter_map(|connection| {
                    cards
                        .get(&connection.source_card_id)
                        .map(|card| (connection.id, card.workspace_id))
                })
                .collect(),
        )
    }

    pub fn workspace_of(&self, connection_id: &ConnectionId) -> Option<WorkspaceId> {
        self.0.get(connection_id).copied()
    }
}

/// Publishes events of committed mutations.
///
/// Publishing is best-effort: failures are logged and never reach the caller, the mutation they
/// describe already happened.
#[derive(Clone, Debug)]
pub struct EventFanout<P> {
    publisher: P,
}

impl<P> EventFanout<P>
where
    P: EventPublisher,
{
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }

    pub async fn publish(&self, event: Event) {
        let workspace_id = *event.workspace_id();
        let topic = event.topic();
        match self.publisher.publish(event).await {
            Ok(()) => debug!(%topic, workspace = %workspace_id, "published event"),
            Err(err) => warn!(%topic, workspace = %workspace_id, %err, "failed publishing event"),
        }
    }

    /// Publish events of a batch, one after another grouped by workspace.
    pub async fn publish_all(&self, events: impl IntoIterator<Item = Event>) {
        let mut grouped: BTreeMap<WorkspaceId, Vec<Event>> = BTreeMap::new();
        for event in events {
            grouped.entry(*event.workspace_id()).or_default().push(event);
        }

        for (_, events) in grouped {
            for event in events {
                self.publish(event).await;
            }
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}
