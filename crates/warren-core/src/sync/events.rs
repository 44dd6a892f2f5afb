//! Publish/subscribe fan-out of state-change events.
//!
//! One `tokio::sync::broadcast` channel per [`Channel`]. Publishing never
//! blocks; a subscriber that falls more than `buffer` events behind skips the
//! events it missed and is told how many through a log line.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt};
use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::clock;

/// Resource category an event belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter, Serialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Agents,
    Projects,
    Config,
    Sync,
    Activity,
}

/// Envelope delivered to subscribers: `{type, data, timestamp, resourceId?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(skip)]
    pub channel: Channel,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl Event {
    pub fn new(channel: Channel, kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            channel,
            kind: kind.into(),
            data,
            timestamp: clock::now(),
            resource_id: None,
        }
    }

    #[must_use]
    pub fn for_resource(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }
}

#[derive(Debug)]
pub struct EventHub {
    senders: HashMap<Channel, broadcast::Sender<Event>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let senders = Channel::iter()
            .map(|channel| (channel, broadcast::channel(buffer.max(1)).0))
            .collect();
        Self { senders }
    }

    /// Fan `event` out to its channel. Returns how many subscribers got it.
    pub fn publish(&self, event: Event) -> usize {
        let channel = event.channel;
        let kind = event.kind.clone();
        let delivered = self
            .senders
            .get(&channel)
            .and_then(|tx| tx.send(event).ok())
            .unwrap_or(0);
        tracing::debug!(%channel, event = %kind, delivered, "event published");
        delivered
    }

    pub fn subscribe(&self, channel: Channel) -> Subscription {
        let receiver = self
            .senders
            .get(&channel)
            .map_or_else(|| broadcast::channel(1).1, broadcast::Sender::subscribe);
        Subscription {
            channel,
            receiver,
            resource: None,
        }
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.senders
            .get(&channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// Receiver side of one channel, optionally narrowed to one resource id.
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    receiver: broadcast::Receiver<Event>,
    resource: Option<String>,
}

impl Subscription {
    #[must_use]
    pub fn for_resource(mut self, id: impl Into<String>) -> Self {
        self.resource = Some(id.into());
        self
    }

    pub const fn channel(&self) -> Channel {
        self.channel
    }

    fn wants(resource: Option<&String>, event: &Event) -> bool {
        resource.map_or(true, |id| event.resource_id.as_ref() == Some(id))
    }

    /// Next matching event, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if Self::wants(self.resource.as_ref(), &event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(channel = %self.channel, missed, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, Event> {
        let Self {
            channel,
            receiver,
            resource,
        } = self;
        BroadcastStream::new(receiver)
            .filter_map(move |item| {
                let keep = match item {
                    Ok(event) if Self::wants(resource.as_ref(), &event) => Some(event),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        tracing::warn!(%channel, missed, "subscriber lagged, events dropped");
                        None
                    }
                };
                futures::future::ready(keep)
            })
            .boxed()
    }
}
