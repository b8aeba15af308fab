//  Copyright 2020, The Tari Project
//
//  Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
//  following conditions are met:
//
//  1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
//  disclaimer.
//
//  2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
//  following disclaimer in the documentation and/or other materials provided with the distribution.
//
//  3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
//  products derived from this software without specific prior written permission.
//
//  THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
//  INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
//  DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
//  SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
//  SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
//  WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
//  USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::collections::HashMap;

use log::*;
use nsm_shutdown::ShutdownSignal;
use tokio::{
    sync::{mpsc, oneshot},
    task,
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{EventType, MonitorEntity, MonitorError, MonitorEvent};

const LOG_TARGET: &str = "nsm::monitor::server";

/// Stream of events for one subscriber. The first event is always the initial state transfer.
pub type MonitorSubscription<T> = UnboundedReceiverStream<MonitorEvent<T>>;

#[derive(Debug)]
pub enum MonitorRequest<T> {
    Update(T),
    Delete(T),
    Subscribe(String, oneshot::Sender<MonitorSubscription<T>>),
    GetEntities(oneshot::Sender<Vec<T>>),
}

/// Handle to a running [MonitorServerActor].
#[derive(Debug)]
pub struct MonitorRequester<T> {
    sender: mpsc::Sender<MonitorRequest<T>>,
}

impl<T> Clone for MonitorRequester<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: MonitorEntity> MonitorRequester<T> {
    pub fn new(sender: mpsc::Sender<MonitorRequest<T>>) -> Self {
        Self { sender }
    }

    /// Add or replace the entity and send an UPDATE to the subscribers in its scope.
    pub async fn update(&self, entity: T) -> Result<(), MonitorError> {
        self.sender
            .send(MonitorRequest::Update(entity))
            .await
            .map_err(|_| MonitorError::ActorDisconnected)
    }

    /// Remove the entity and send a DELETE to the subscribers in its scope.
    pub async fn delete(&self, entity: T) -> Result<(), MonitorError> {
        self.sender
            .send(MonitorRequest::Delete(entity))
            .await
            .map_err(|_| MonitorError::ActorDisconnected)
    }

    /// Subscribe to entities within `scope` (a manager name, or empty for everything).
    pub async fn subscribe<S: Into<String>>(&self, scope: S) -> Result<MonitorSubscription<T>, MonitorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(MonitorRequest::Subscribe(scope.into(), reply_tx))
            .await
            .map_err(|_| MonitorError::ActorDisconnected)?;
        reply_rx.await.map_err(|_| MonitorError::ActorResponseCancelled)
    }

    pub async fn get_entities(&self) -> Result<Vec<T>, MonitorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(MonitorRequest::GetEntities(reply_tx))
            .await
            .map_err(|_| MonitorError::ActorDisconnected)?;
        reply_rx.await.map_err(|_| MonitorError::ActorResponseCancelled)
    }
}

/// Keeps the current snapshot of monitored entities and fans changes out to subscribers.
pub struct MonitorServer<T> {
    pub name: &'static str,
    pub request_rx: mpsc::Receiver<MonitorRequest<T>>,
    pub shutdown_signal: ShutdownSignal,
}

impl<T: MonitorEntity> MonitorServer<T> {
    pub fn create(self) -> MonitorServerActor<T> {
        MonitorServerActor {
            name: self.name,
            request_rx: self.request_rx,
            shutdown_signal: self.shutdown_signal,
            entities: HashMap::new(),
            subscribers: Vec::new(),
        }
    }
}

struct Subscriber<T> {
    scope: String,
    sender: mpsc::UnboundedSender<MonitorEvent<T>>,
}

pub struct MonitorServerActor<T> {
    name: &'static str,
    request_rx: mpsc::Receiver<MonitorRequest<T>>,
    shutdown_signal: ShutdownSignal,
    entities: HashMap<String, T>,
    subscribers: Vec<Subscriber<T>>,
}

impl<T: MonitorEntity> MonitorServerActor<T> {
    pub fn spawn(self) -> JoinHandle<()> {
        task::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(target: LOG_TARGET, "{} monitor server started", self.name);
        let mut shutdown_signal = self.shutdown_signal.clone();
        loop {
            tokio::select! {
                Some(request) = self.request_rx.recv() => {
                    self.handle_request(request);
                },

                _ = &mut shutdown_signal => {
                    info!(target: LOG_TARGET, "{} monitor server is shutting down because it received the shutdown signal", self.name);
                    break;
                },

                else => break,
            }
        }
    }

    fn handle_request(&mut self, request: MonitorRequest<T>) {
        use MonitorRequest::*;
        match request {
            Update(entity) => {
                self.entities.insert(entity.entity_id().to_string(), entity.clone());
                self.publish(MonitorEvent::new(EventType::Update, Some(entity)));
            },
            Delete(entity) => {
                if self.entities.remove(entity.entity_id()).is_none() {
                    debug!(
                        target: LOG_TARGET,
                        "{} monitor: deleting unknown entity '{}'",
                        self.name,
                        entity.entity_id()
                    );
                }
                self.publish(MonitorEvent::new(EventType::Delete, Some(entity)));
            },
            Subscribe(scope, reply) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let initial = MonitorEvent::new(EventType::InitialStateTransfer, self.entities.values().cloned());
                if let Some(event) = initial.filter_scope(&scope) {
                    let _ = tx.send(event);
                }
                debug!(
                    target: LOG_TARGET,
                    "{} monitor: new subscriber (scope '{}'), {} entities in snapshot",
                    self.name,
                    scope,
                    self.entities.len()
                );
                self.subscribers.push(Subscriber { scope, sender: tx });
                let _ = reply.send(UnboundedReceiverStream::new(rx));
            },
            GetEntities(reply) => {
                let _ = reply.send(self.entities.values().cloned().collect());
            },
        }
    }

    fn publish(&mut self, event: MonitorEvent<T>) {
        trace!(target: LOG_TARGET, "{} monitor: publishing {}", self.name, event);
        let name = self.name;
        self.subscribers.retain(|subscriber| match event.filter_scope(&subscriber.scope) {
            Some(filtered) => {
                let is_open = subscriber.sender.send(filtered).is_ok();
                if !is_open {
                    debug!(target: LOG_TARGET, "{} monitor: subscriber has gone away", name);
                }
                is_open
            },
            None => !subscriber.sender.is_closed(),
        });
    }
}

/// Create a monitor server and a requester for it. The server runs until `shutdown_signal` resolves.
pub fn spawn_monitor_server<T: MonitorEntity>(
    name: &'static str,
    buffer_size: usize,
    shutdown_signal: ShutdownSignal,
) -> MonitorRequester<T>
{
    let (sender, request_rx) = mpsc::channel(buffer_size);
    MonitorServer {
        name,
        request_rx,
        shutdown_signal,
    }
    .create()
    .spawn();
    MonitorRequester::new(sender)
}

#[cfg(test)]
mod test {
    use futures::StreamExt;
    use nsm_shutdown::Shutdown;

    use super::*;
    use crate::{connection::Connection, test_utils::factories};

    fn remote_connection(id: &str, src: &str, dst: &str) -> Connection {
        let mut conn = Connection::remote(id, "icmp", src, dst);
        conn.context = Some(Default::default());
        conn
    }

    #[tokio::test]
    async fn initial_state_transfer_comes_first() {
        let shutdown = Shutdown::new();
        let monitor = spawn_monitor_server::<Connection>("test", 10, shutdown.to_signal());
        monitor.update(remote_connection("1", "nsm-1", "nsm-2")).await.unwrap();
        monitor.update(remote_connection("2", "nsm-1", "nsm-3")).await.unwrap();

        let mut subscription = monitor.subscribe("").await.unwrap();
        monitor.delete(remote_connection("1", "nsm-1", "nsm-2")).await.unwrap();

        let initial = subscription.next().await.unwrap();
        assert!(initial.event_type.is_initial_state_transfer());
        assert_eq!(initial.entities.len(), 2);
        let delete = subscription.next().await.unwrap();
        assert!(delete.event_type.is_delete());
        assert!(delete.entities.contains_key("1"));

        let entities = monitor.get_entities().await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "2");
    }

    #[tokio::test]
    async fn events_are_filtered_by_scope() {
        let shutdown = Shutdown::new();
        let monitor = spawn_monitor_server::<Connection>("test", 10, shutdown.to_signal());
        monitor.update(remote_connection("1", "nsm-1", "nsm-2")).await.unwrap();

        let mut subscription = monitor.subscribe("nsm-3").await.unwrap();
        monitor.update(remote_connection("2", "nsm-1", "nsm-2")).await.unwrap();
        monitor.update(remote_connection("3", "nsm-3", "nsm-1")).await.unwrap();

        // The initial transfer is sent even though nothing is in scope
        let initial = subscription.next().await.unwrap();
        assert!(initial.event_type.is_initial_state_transfer());
        assert!(initial.entities.is_empty());
        let update = subscription.next().await.unwrap();
        assert!(update.event_type.is_update());
        assert_eq!(update.entities.keys().collect::<Vec<_>>(), vec!["3"]);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_removed() {
        let shutdown = Shutdown::new();
        let monitor = spawn_monitor_server::<Connection>("test", 10, shutdown.to_signal());
        let subscription = monitor.subscribe(factories::nsm("nsm-1").name).await.unwrap();
        drop(subscription);
        monitor.update(remote_connection("1", "nsm-1", "nsm-2")).await.unwrap();
        let mut subscription = monitor.subscribe("nsm-1").await.unwrap();
        let initial = subscription.next().await.unwrap();
        assert_eq!(initial.entities.len(), 1);
    }

    #[tokio::test]
    async fn requests_fail_after_shutdown() {
        let mut shutdown = Shutdown::new();
        let monitor = spawn_monitor_server::<Connection>("test", 10, shutdown.to_signal());
        shutdown.trigger();
        nsm_test_utils::async_assert_eventually!(
            monitor.get_entities().await.is_err(),
            expect = true,
            max_attempts = 20,
            interval = std::time::Duration::from_millis(10),
        );
        assert_eq!(
            monitor.update(remote_connection("1", "nsm-1", "nsm-2")).await,
            Err(MonitorError::ActorDisconnected)
        );
    }
}
