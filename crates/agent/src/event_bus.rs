//! In-process fan-out over the three ordered channels. A
//! publish allocates the next sequence number and durably appends via
//! [`crate::store::Store`] inside a single per-(agent, channel) lock, then
//! dispatches to live subscribers — so replay-then-live handoff in
//! [`EventBus::subscribe`] never misses or duplicates an event (Open
//! Question (a) in DESIGN.md resolves to this sequence-based handoff rather
//! than ad-hoc retries).
//!
//! Progress and Control never drop: a slow subscriber blocks the publisher
//! up to [`SLOW_CONSUMER_DEADLINE`], after which the publish fails and a
//! Monitor event records it. Monitor itself uses a broadcast channel, which
//! drops the oldest entry for a lagging subscriber rather than blocking.

use crate::error::{AgentError, AgentResult};
use crate::protocol::{Bookmark, Channel, DomainEvent, Timeline};
use crate::store::Store;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};

const DEFAULT_BUFFER: usize = 256;
const SLOW_CONSUMER_DEADLINE: std::time::Duration = std::time::Duration::from_millis(1000);

enum ChannelFanout {
    /// Progress and Control: bounded per-subscriber channels, blocking send.
    Ordered(Vec<mpsc::Sender<Timeline>>),
    /// Monitor: one broadcast sender, drops the oldest entry under lag.
    Monitor(broadcast::Sender<Timeline>),
}

struct ChannelState {
    next_seq: u64,
    fanout: ChannelFanout,
}

pub enum EventReceiver {
    Ordered(mpsc::Receiver<Timeline>),
    Monitor(broadcast::Receiver<Timeline>),
}

impl EventReceiver {
    /// Yields the next timeline entry, or `None` once the channel is
    /// permanently closed. A Monitor subscriber that lagged behind the
    /// broadcast buffer silently skips ahead rather than erroring, matching
    /// Monitor's drop-oldest policy.
    pub async fn recv(&mut self) -> Option<Timeline> {
        match self {
            EventReceiver::Ordered(rx) => rx.recv().await,
            EventReceiver::Monitor(rx) => loop {
                match rx.recv().await {
                    Ok(timeline) => return Some(timeline),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }
}

pub struct EventBus {
    store: Arc<dyn Store>,
    buffer: usize,
    channels: SyncMutex<HashMap<(String, Channel), Arc<AsyncMutex<ChannelState>>>>,
}

impl EventBus {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_buffer(store, DEFAULT_BUFFER)
    }

    pub fn with_buffer(store: Arc<dyn Store>, buffer: usize) -> Self {
        Self {
            store,
            buffer,
            channels: SyncMutex::new(HashMap::new()),
        }
    }

    fn state_for(&self, agent_id: &str, channel: Channel) -> Arc<AsyncMutex<ChannelState>> {
        let key = (agent_id.to_string(), channel);
        let mut channels = self.channels.lock();
        channels
            .entry(key)
            .or_insert_with(|| {
                let fanout = match channel {
                    Channel::Monitor => ChannelFanout::Monitor(broadcast::channel(self.buffer).0),
                    Channel::Progress | Channel::Control => ChannelFanout::Ordered(Vec::new()),
                };
                Arc::new(AsyncMutex::new(ChannelState { next_seq: 1, fanout }))
            })
            .clone()
    }

    /// Allocates the next sequence number, durably appends, and fans out to
    /// live subscribers. Returns the published [`Timeline`].
    pub async fn publish(
        &self,
        agent_id: &str,
        channel: Channel,
        event: DomainEvent,
    ) -> AgentResult<Timeline> {
        let state = self.state_for(agent_id, channel);
        let mut guard = state.lock().await;

        let seq = guard.next_seq;
        let bookmark = Bookmark {
            seq,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        };
        let timeline = Timeline {
            cursor: seq,
            bookmark,
            event,
        };

        self.store.append_event(agent_id, channel, &timeline).await?;
        guard.next_seq += 1;

        let slow_consumer = match &mut guard.fanout {
            ChannelFanout::Monitor(sender) => {
                let _ = sender.send(timeline.clone());
                false
            }
            ChannelFanout::Ordered(subscribers) => {
                let mut alive = Vec::with_capacity(subscribers.len());
                let mut timed_out = false;
                for sub in subscribers.drain(..) {
                    match tokio::time::timeout(SLOW_CONSUMER_DEADLINE, sub.send(timeline.clone())).await {
                        Ok(Ok(())) => alive.push(sub),
                        Ok(Err(_)) => { /* receiver dropped, drop the subscriber */ }
                        Err(_) => timed_out = true,
                    }
                }
                *subscribers = alive;
                timed_out
            }
        };
        drop(guard);

        if slow_consumer {
            let _ = self
                .publish(
                    agent_id,
                    Channel::Monitor,
                    DomainEvent::Error {
                        message: format!("slow consumer on {} channel", channel.as_str()),
                    },
                )
                .await;
            return Err(AgentError::Internal(format!(
                "slow consumer on {} channel for agent {agent_id}",
                channel.as_str()
            )));
        }

        Ok(timeline)
    }

    /// Replays persisted events after `since` (or from the start), then
    /// returns a live receiver registered atomically with that replay so no
    /// event is missed or delivered twice across the handoff.
    pub async fn subscribe(
        &self,
        agent_id: &str,
        channel: Channel,
        since: Option<Bookmark>,
    ) -> AgentResult<(Vec<Timeline>, EventReceiver)> {
        let state = self.state_for(agent_id, channel);
        let mut guard = state.lock().await;

        let replay = self
            .store
            .read_events(agent_id, channel, since.map(|b| b.seq))
            .await?;

        let receiver = match &mut guard.fanout {
            ChannelFanout::Monitor(sender) => EventReceiver::Monitor(sender.subscribe()),
            ChannelFanout::Ordered(subscribers) => {
                let (tx, rx) = mpsc::channel(self.buffer);
                subscribers.push(tx);
                EventReceiver::Ordered(rx)
            }
        };

        Ok((replay, receiver))
    }
}
