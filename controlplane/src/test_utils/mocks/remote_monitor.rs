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

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::{lock::Mutex, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    clients::{ClientError, ClientStream, RemoteMonitorClient},
    monitor::ConnectionEvent,
    registry::NetworkServiceManager,
};

type EventSender = mpsc::UnboundedSender<Result<ConnectionEvent, ClientError>>;

#[derive(Debug, Default)]
struct State {
    calls: Vec<String>,
    streams: HashMap<String, Vec<EventSender>>,
    unreachable: Vec<String>,
}

/// Serves connection monitor streams of remote managers. Tests publish events per manager name.
#[derive(Debug, Clone, Default)]
pub struct RemoteMonitorMock {
    inner: Arc<Mutex<State>>,
}

impl RemoteMonitorMock {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn set_unreachable(&self, manager: &str) {
        self.with_state(|state| state.unreachable.push(manager.to_string())).await
    }

    /// Returns the number of open streams the event was delivered to.
    pub async fn publish(&self, manager: &str, event: ConnectionEvent) -> usize {
        self.with_state(|state| {
            let senders = state.streams.entry(manager.to_string()).or_default();
            senders.retain(|tx| tx.send(Ok(event.clone())).is_ok());
            senders.len()
        })
        .await
    }

    /// End the streams of the manager with an error, as if the remote manager went away.
    pub async fn close_stream(&self, manager: &str) {
        self.with_state(|state| {
            if let Some(senders) = state.streams.remove(manager) {
                for tx in senders {
                    let _ = tx.send(Err(ClientError::StreamClosed));
                }
            }
        })
        .await
    }

    /// True while a consumer holds an open stream for the manager.
    pub async fn is_monitoring(&self, manager: &str) -> bool {
        self.with_state(|state| {
            state
                .streams
                .get(manager)
                .map(|senders| senders.iter().any(|tx| !tx.is_closed()))
                .unwrap_or(false)
        })
        .await
    }

    pub async fn take_calls(&self) -> Vec<String> {
        self.with_state(|state| state.calls.drain(..).collect()).await
    }

    pub async fn count_calls_containing(&self, pat: &str) -> usize {
        self.with_state(|state| state.calls.iter().filter(|s| s.contains(pat)).count())
            .await
    }

    async fn with_state<F, R>(&self, f: F) -> R
    where F: FnOnce(&mut State) -> R {
        let mut lock = self.inner.lock().await;
        (f)(&mut *lock)
    }
}

#[async_trait]
impl RemoteMonitorClient for RemoteMonitorMock {
    async fn monitor_connections(
        &self,
        manager: &NetworkServiceManager,
        scope: &str,
    ) -> Result<ClientStream<ConnectionEvent>, ClientError>
    {
        let name = manager.name.clone();
        let scope = scope.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let reachable = self
            .with_state(move |state| {
                state.calls.push(format!("monitor:{}:{}", name, scope));
                if state.unreachable.contains(&name) {
                    return false;
                }
                state.streams.entry(name).or_default().push(tx);
                true
            })
            .await;
        if !reachable {
            return Err(ClientError::Transport(format!("{} is unreachable", manager.name)));
        }
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
