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

use std::{collections::HashSet, sync::Arc};

use log::*;
use nsm_shutdown::ShutdownSignal;
use tokio::{
    sync::{mpsc, oneshot},
    task,
    task::JoinHandle,
};

use super::{HealOutcome, HealRequest, HealStateMachine, HealTrigger};
use crate::{
    config::NsmConfig,
    model::{ClientConnection, ClientConnectionState, Model},
    nse_manager::NseManager,
    pipeline::RequestPipeline,
};

const LOG_TARGET: &str = "nsm::heal::processor";

/// Receives [HealRequest]s and runs each heal on its own task. At most one heal per connection is in flight.
pub struct HealProcessor {
    pub config: Arc<NsmConfig>,
    pub model: Model,
    pub pipeline: RequestPipeline,
    pub nse_manager: NseManager,
    pub request_rx: mpsc::Receiver<HealRequest>,
    pub shutdown_signal: ShutdownSignal,
}

impl HealProcessor {
    pub fn create(self) -> HealProcessorActor {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        HealProcessorActor {
            state_machine: HealStateMachine::new(
                self.config.clone(),
                self.model.clone(),
                self.pipeline.clone(),
                self.nse_manager,
            ),
            config: self.config,
            model: self.model,
            pipeline: self.pipeline,
            request_rx: self.request_rx,
            shutdown_signal: self.shutdown_signal,
            in_flight: HashSet::new(),
            completed_tx,
            completed_rx,
        }
    }
}

pub struct HealProcessorActor {
    config: Arc<NsmConfig>,
    model: Model,
    pipeline: RequestPipeline,
    state_machine: HealStateMachine,
    request_rx: mpsc::Receiver<HealRequest>,
    shutdown_signal: ShutdownSignal,
    in_flight: HashSet<String>,
    completed_tx: mpsc::UnboundedSender<String>,
    completed_rx: mpsc::UnboundedReceiver<String>,
}

impl HealProcessorActor {
    pub fn spawn(self) -> JoinHandle<()> {
        task::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(target: LOG_TARGET, "Heal processor started (heal enabled: {})", self.config.heal_enabled);
        let mut shutdown_signal = self.shutdown_signal.clone();
        loop {
            tokio::select! {
                Some(request) = self.request_rx.recv() => {
                    self.handle_request(request);
                },

                Some(id) = self.completed_rx.recv() => {
                    trace!(target: LOG_TARGET, "Heal of connection '{}' completed", id);
                    self.in_flight.remove(&id);
                },

                _ = &mut shutdown_signal => {
                    info!(target: LOG_TARGET, "Heal processor is shutting down because it received the shutdown signal");
                    break;
                },

                else => break,
            }
        }
    }

    fn handle_request(&mut self, request: HealRequest) {
        let HealRequest {
            connection,
            trigger,
            reply,
        } = request;
        let id = connection.id().to_string();

        if self.in_flight.contains(&id) {
            debug!(target: LOG_TARGET, "Heal of connection '{}' already in progress, ignoring {}", id, trigger);
            reply_with(reply, HealOutcome::Skipped);
            return;
        }

        if !self.config.heal_enabled {
            self.close_without_heal(connection, trigger, reply);
            return;
        }

        let editor = match self
            .model
            .compare_and_change_state(&id, ClientConnectionState::Ready, ClientConnectionState::Healing)
        {
            Ok(editor) => editor,
            Err(err) => {
                debug!(target: LOG_TARGET, "Not healing connection '{}' ({}): {}", id, trigger, err);
                reply_with(reply, HealOutcome::Skipped);
                return;
            },
        };

        let healing = editor.connection;
        self.in_flight.insert(id.clone());
        let state_machine = self.state_machine.clone();
        let completed_tx = self.completed_tx.clone();
        task::spawn(async move {
            let outcome = state_machine.heal(healing, trigger).await;
            let _ = completed_tx.send(id);
            reply_with(reply, outcome);
        });
    }

    fn close_without_heal(
        &mut self,
        connection: ClientConnection,
        trigger: HealTrigger,
        reply: Option<oneshot::Sender<HealOutcome>>,
    )
    {
        let id = connection.id().to_string();
        let is_ready = self
            .model
            .get_client_connection(&id)
            .map(|cc| cc.state().is_ready())
            .unwrap_or(false);
        if !is_ready {
            debug!(target: LOG_TARGET, "Connection '{}' is not Ready, not closing it for {}", id, trigger);
            reply_with(reply, HealOutcome::Skipped);
            return;
        }

        info!(target: LOG_TARGET, "Healing is disabled, closing connection '{}' after {}", id, trigger);
        self.in_flight.insert(id.clone());
        let pipeline = self.pipeline.clone();
        let completed_tx = self.completed_tx.clone();
        task::spawn(async move {
            if let Err(err) = pipeline.close(&id).await {
                error!(target: LOG_TARGET, "Error closing connection '{}': {}", id, err);
            }
            let _ = completed_tx.send(id);
            reply_with(reply, HealOutcome::Closed);
        });
    }
}

fn reply_with(reply: Option<oneshot::Sender<HealOutcome>>, outcome: HealOutcome) {
    if let Some(reply) = reply {
        let _ = reply.send(outcome);
    }
}
