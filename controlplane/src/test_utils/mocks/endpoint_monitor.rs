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
    clients::{ClientError, ClientStream, EndpointMonitorClient},
    model::Endpoint,
    monitor::ConnectionEvent,
};

type EventSender = mpsc::UnboundedSender<Result<ConnectionEvent, ClientError>>;

#[derive(Debug, Default)]
struct State {
    calls: Vec<String>,
    streams: HashMap<String, Vec<EventSender>>,
    unreachable: Vec<String>,
}

/// Serves connection monitor streams of local endpoints, keyed by endpoint name. Every endpoint can be monitored
/// unless marked unreachable.
#[derive(Debug, Clone, Default)]
pub struct EndpointMonitorMock {
    inner: Arc<Mutex<State>>,
}

impl EndpointMonitorMock {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn set_unreachable(&self, endpoint: &str) {
        self.with_state(|state| state.unreachable.push(endpoint.to_string())).await
    }

    /// Returns the number of open streams the event was delivered to.
    pub async fn publish(&self, endpoint: &str, event: ConnectionEvent) -> usize {
        self.with_state(|state| {
            let senders = state.streams.entry(endpoint.to_string()).or_default();
            senders.retain(|tx| tx.send(Ok(event.clone())).is_ok());
            senders.len()
        })
        .await
    }

    /// Fail the streams of the endpoint, as if its socket went away.
    pub async fn break_stream(&self, endpoint: &str) {
        self.with_state(|state| {
            if let Some(senders) = state.streams.remove(endpoint) {
                for tx in senders {
                    let _ = tx.send(Err(ClientError::StreamClosed));
                }
            }
        })
        .await
    }

    pub async fn is_monitoring(&self, endpoint: &str) -> bool {
        self.with_state(|state| {
            state
                .streams
                .get(endpoint)
                .map(|senders| senders.iter().any(|tx| !tx.is_closed()))
                .unwrap_or(false)
        })
        .await
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
impl EndpointMonitorClient for EndpointMonitorMock {
    async fn monitor_connections(&self, endpoint: &Endpoint) -> Result<ClientStream<ConnectionEvent>, ClientError> {
        let name = endpoint.name().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let reachable = self
            .with_state(move |state| {
                state.calls.push(format!("monitor:{}", name));
                if state.unreachable.contains(&name) {
                    return false;
                }
                state.streams.entry(name).or_default().push(tx);
                true
            })
            .await;
        if !reachable {
            return Err(ClientError::Transport(format!("{} is unreachable", endpoint.name())));
        }
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
