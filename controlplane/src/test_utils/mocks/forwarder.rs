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
    clients::{ClientError, ClientStream, ForwarderClient},
    connection::CrossConnect,
    model::Forwarder,
    monitor::CrossConnectEvent,
};

type EventSender = mpsc::UnboundedSender<Result<CrossConnectEvent, ClientError>>;

#[derive(Debug, Default)]
struct State {
    calls: Vec<String>,
    fail_requests: usize,
    fail_closes: bool,
    /// Cross-connects currently programmed, keyed by forwarder then cross-connect id
    programmed: HashMap<String, HashMap<String, CrossConnect>>,
    monitors: HashMap<String, Vec<EventSender>>,
}

/// Records forwarder requests and serves cross-connect monitor streams that tests publish to.
#[derive(Debug, Clone, Default)]
pub struct ForwarderMock {
    inner: Arc<Mutex<State>>,
}

impl ForwarderMock {
    pub fn new() -> Self {
        Default::default()
    }

    /// Fail the next `n` requests.
    pub async fn fail_next_requests(&self, n: usize) {
        self.with_state(|state| state.fail_requests = n).await
    }

    pub async fn set_fail_closes(&self, fail: bool) {
        self.with_state(|state| state.fail_closes = fail).await
    }

    pub async fn programmed(&self, forwarder: &str) -> HashMap<String, CrossConnect> {
        self.with_state(|state| state.programmed.get(forwarder).cloned().unwrap_or_default())
            .await
    }

    /// Send an event to every open monitor stream of the forwarder. Returns the number of streams reached.
    pub async fn publish(&self, forwarder: &str, event: CrossConnectEvent) -> usize {
        self.with_state(|state| {
            let senders = state.monitors.entry(forwarder.to_string()).or_default();
            senders.retain(|tx| tx.send(Ok(event.clone())).is_ok());
            senders.len()
        })
        .await
    }

    /// End every monitor stream of the forwarder with an error, as if the forwarder went away.
    pub async fn break_monitor(&self, forwarder: &str) {
        self.with_state(|state| {
            if let Some(senders) = state.monitors.remove(forwarder) {
                for tx in senders {
                    let _ = tx.send(Err(ClientError::StreamClosed));
                }
            }
        })
        .await
    }

    pub async fn is_monitored(&self, forwarder: &str) -> bool {
        self.with_state(|state| {
            state
                .monitors
                .get(forwarder)
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
impl ForwarderClient for ForwarderMock {
    async fn request(&self, forwarder: &Forwarder, cross_connect: CrossConnect) -> Result<CrossConnect, ClientError> {
        let name = forwarder.registered_name.clone();
        self.with_state(move |state| {
            state.calls.push(format!("request:{}:{}", name, cross_connect.id));
            if state.fail_requests > 0 {
                state.fail_requests -= 1;
                return Err(ClientError::Remote(format!("{} failed to program cross-connect", name)));
            }
            state
                .programmed
                .entry(name)
                .or_default()
                .insert(cross_connect.id.clone(), cross_connect.clone());
            Ok(cross_connect)
        })
        .await
    }

    async fn close(&self, forwarder: &Forwarder, cross_connect: CrossConnect) -> Result<(), ClientError> {
        let name = forwarder.registered_name.clone();
        self.with_state(move |state| {
            state.calls.push(format!("close:{}:{}", name, cross_connect.id));
            if state.fail_closes {
                return Err(ClientError::Remote(format!("{} failed to close cross-connect", name)));
            }
            if let Some(programmed) = state.programmed.get_mut(&name) {
                programmed.remove(&cross_connect.id);
            }
            Ok(())
        })
        .await
    }

    async fn monitor_cross_connects(&self, forwarder: &Forwarder) -> Result<ClientStream<CrossConnectEvent>, ClientError> {
        let name = forwarder.registered_name.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_state(move |state| {
            state.calls.push(format!("monitor:{}", name));
            state.monitors.entry(name).or_default().push(tx);
        })
        .await;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
