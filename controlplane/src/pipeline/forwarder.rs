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

use std::sync::Arc;

use async_trait::async_trait;
use log::*;
use tokio::time;

use super::{NetworkServiceStage, Next, RequestContext, RequestError};
use crate::{
    clients::{ClientError, ForwarderClient},
    config::NsmConfig,
    connection::{Connection, CrossConnect, NetworkServiceRequest},
    mechanism::MechanismSelector,
    model::{Forwarder, ForwarderState, Model},
};

const LOG_TARGET: &str = "nsm::pipeline::forwarder";

/// Selects a forwarder able to serve the request, picks the caller-facing mechanism and, once the endpoint leg is
/// established, programs the forwarder with the cross-connect.
pub struct ForwarderStage {
    model: Model,
    client: Arc<dyn ForwarderClient>,
    mechanism_selector: MechanismSelector,
    config: Arc<NsmConfig>,
}

impl ForwarderStage {
    pub fn new(
        model: Model,
        client: Arc<dyn ForwarderClient>,
        mechanism_selector: MechanismSelector,
        config: Arc<NsmConfig>,
    ) -> Self
    {
        Self {
            model,
            client,
            mechanism_selector,
            config,
        }
    }

    async fn program_forwarder(
        &self,
        forwarder: &Forwarder,
        xcon: CrossConnect,
    ) -> Result<CrossConnect, RequestError>
    {
        let attempts = self.config.forwarder_retry_count.max(1);
        let mut last_error = ClientError::Timeout(self.config.forwarder_request_timeout);
        for attempt in 1..=attempts {
            debug!(
                target: LOG_TARGET,
                "Sending request to forwarder '{}' (attempt {}/{}): {}", forwarder.registered_name, attempt, attempts, xcon
            );
            let result = time::timeout(
                self.config.forwarder_request_timeout,
                self.client.request(forwarder, xcon.clone()),
            )
            .await
            .unwrap_or(Err(ClientError::Timeout(self.config.forwarder_request_timeout)));

            match result {
                Ok(xcon) => return Ok(xcon),
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        "Forwarder '{}' request failed (attempt {}/{}): {}", forwarder.registered_name, attempt, attempts, err
                    );
                    last_error = err;
                },
            }
            if attempt < attempts {
                time::sleep(self.config.forwarder_retry_delay).await;
            }
        }
        Err(RequestError::ForwarderRequest {
            forwarder: forwarder.registered_name.clone(),
            attempts,
            error: last_error,
        })
    }
}

#[async_trait]
impl NetworkServiceStage for ForwarderStage {
    async fn request(
        &self,
        ctx: &mut RequestContext,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, RequestError>
    {
        self.model
            .wait_for_forwarder(self.config.forwarder_wait_timeout, self.config.forwarder_poll_interval)
            .await?;

        let remote = request.is_remote();
        let forwarder = self.model.select_forwarder(|fwd| {
            request
                .mechanism_preferences
                .iter()
                .any(|m| MechanismSelector::find(fwd, m.mechanism_type, remote).is_some())
        })?;
        let mechanism = self.mechanism_selector.select(&request, &forwarder)?;
        debug!(
            target: LOG_TARGET,
            "Forwarder '{}' selected with mechanism {}", forwarder.registered_name, mechanism
        );
        request.connection.mechanism = Some(mechanism);
        ctx.forwarder = Some(forwarder.clone());

        let conn = next.request(ctx, request).await?;

        let xcon = ctx
            .client_connection()?
            .xcon
            .clone()
            .ok_or(RequestError::MissingContext("cross-connect"))?;
        let programmed = match self.program_forwarder(&forwarder, xcon).await {
            Ok(xcon) => xcon,
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    "Forwarder request failed on all attempts, closing endpoint leg: {}", err
                );
                if let Err(close_err) = next.close(ctx, conn).await {
                    error!(target: LOG_TARGET, "Failed to close endpoint leg: {}", close_err);
                }
                return Err(err);
            },
        };

        let mut source = programmed.source.clone();
        if let Some(context) = &conn.context {
            source.update_context(context).map_err(RequestError::ContextUpdate)?;
        }
        let cc = ctx.client_connection_mut()?;
        cc.xcon = Some(programmed);
        cc.forwarder_registered_name = forwarder.registered_name.clone();
        cc.forwarder_state = ForwarderState::Ready;
        Ok(source)
    }

    async fn close(&self, ctx: &mut RequestContext, connection: Connection, next: Next<'_>) -> Result<(), RequestError> {
        let forwarder_result = match ctx.client_connection.as_mut() {
            Some(cc) if cc.forwarder_state.is_ready() => {
                let result = match (self.model.get_forwarder(&cc.forwarder_registered_name), cc.xcon.clone()) {
                    (Some(forwarder), Some(xcon)) => time::timeout(
                        self.config.forwarder_request_timeout,
                        self.client.close(&forwarder, xcon),
                    )
                    .await
                    .unwrap_or(Err(ClientError::Timeout(self.config.forwarder_request_timeout)))
                    .map_err(|error| RequestError::ForwarderClose {
                        forwarder: forwarder.registered_name.clone(),
                        error,
                    }),
                    (None, _) => {
                        debug!(
                            target: LOG_TARGET,
                            "Forwarder '{}' is gone, nothing to close", cc.forwarder_registered_name
                        );
                        Ok(())
                    },
                    (_, None) => Ok(()),
                };
                cc.forwarder_state = ForwarderState::None;
                result
            },
            _ => Ok(()),
        };

        let next_result = next.close(ctx, connection).await;
        RequestError::combine_close_results(vec![forwarder_result, next_result])
    }
}
