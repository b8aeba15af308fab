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

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use super::error::HealError;
use crate::model::ClientConnection;

/// What was detected to be broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealTrigger {
    /// The destination endpoint is gone
    DstDown,
    /// The local forwarder is gone
    ForwarderDown,
    /// The remote side reported changed destination parameters
    DstUpdate,
    /// The manager owning the destination is unreachable
    DstNmgrDown,
}

impl fmt::Display for HealTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealOutcome {
    /// The connection is Ready again
    Healed,
    /// The connection could not be healed and was closed
    Closed,
    /// The connection was not Ready or a heal for it was already in flight
    Skipped,
}

impl HealOutcome {
    is_fn!(is_healed, HealOutcome::Healed);

    is_fn!(is_closed, HealOutcome::Closed);

    is_fn!(is_skipped, HealOutcome::Skipped);
}

#[derive(Debug)]
pub struct HealRequest {
    pub connection: ClientConnection,
    pub trigger: HealTrigger,
    pub reply: Option<oneshot::Sender<HealOutcome>>,
}

/// Handle used to hand broken connections to the heal processor.
#[derive(Debug, Clone)]
pub struct HealRequester {
    sender: mpsc::Sender<HealRequest>,
}

impl HealRequester {
    pub fn new(sender: mpsc::Sender<HealRequest>) -> Self {
        Self { sender }
    }

    /// Queue a heal. Returns as soon as the heal processor has accepted the request.
    pub async fn heal(&self, connection: ClientConnection, trigger: HealTrigger) -> Result<(), HealError> {
        self.sender
            .send(HealRequest {
                connection,
                trigger,
                reply: None,
            })
            .await
            .map_err(|_| HealError::ActorDisconnected)
    }

    /// Heal and wait for the outcome.
    pub async fn heal_and_wait(
        &self,
        connection: ClientConnection,
        trigger: HealTrigger,
    ) -> Result<HealOutcome, HealError>
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(HealRequest {
                connection,
                trigger,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| HealError::ActorDisconnected)?;
        reply_rx.await.map_err(|_| HealError::ActorResponseCancelled)
    }
}
