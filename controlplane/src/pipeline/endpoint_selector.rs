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

use std::collections::HashSet;

use async_trait::async_trait;
use log::*;

use super::{NetworkServiceStage, Next, RequestContext, RequestError};
use crate::{
    connection::{Connection, ConnectionState, NetworkServiceRequest, NEW_CONNECTION_ID},
    model::ClientConnection,
    nse_manager::NseManager,
    registry::NseRegistration,
};

const LOG_TARGET: &str = "nsm::pipeline::endpoint_selector";

/// Resolves the endpoint for a request. Every endpoint that fails is ignored for the remainder of the call and the
/// next candidate is tried until none are left.
///
/// When an existing connection is re-requested and nothing on the endpoint side changed, the endpoint is not
/// contacted at all: the existing destination is kept and only the caller-facing leg is refreshed.
pub struct EndpointSelectorStage {
    nse_manager: NseManager,
}

impl EndpointSelectorStage {
    pub fn new(nse_manager: NseManager) -> Self {
        Self { nse_manager }
    }

    async fn nse_request_required(
        &self,
        ctx: &mut RequestContext,
        request: &NetworkServiceRequest,
        cc: &ClientConnection,
        next: Next<'_>,
    ) -> Result<bool, RequestError>
    {
        if ctx.nse_request_required || cc.endpoint.is_none() {
            return Ok(true);
        }
        let (source, destination) = match (cc.source(), cc.destination()) {
            (Some(src), Some(dst)) if dst.id != NEW_CONNECTION_ID => (src.clone(), dst.clone()),
            _ => return Ok(true),
        };

        if request.connection.network_service != source.network_service {
            debug!(
                target: LOG_TARGET,
                "Network service changed from '{}' to '{}', closing the existing endpoint leg",
                source.network_service,
                request.connection.network_service
            );
            if let Err(err) = next.close(ctx, source).await {
                error!(target: LOG_TARGET, "Error closing endpoint leg on network service change: {}", err);
            }
            return Ok(true);
        }

        if request.connection.context != source.context {
            debug!(target: LOG_TARGET, "Context is different, NSE request is required");
            return Ok(true);
        }

        if destination.is_remote() {
            let forwarder = ctx.forwarder()?;
            let dst_mechanism = match &destination.mechanism {
                Some(m) => m,
                None => return Ok(true),
            };
            match forwarder.find_remote_mechanism(dst_mechanism.mechanism_type) {
                Some(fwd_mechanism) => {
                    let changed = fwd_mechanism
                        .parameters
                        .iter()
                        .find(|(k, v)| dst_mechanism.parameter(k) != Some(v.as_str()));
                    if let Some((k, v)) = changed {
                        debug!(
                            target: LOG_TARGET,
                            "Remote mechanism parameter {} changed: {:?} -> {}",
                            k,
                            dst_mechanism.parameter(k),
                            v
                        );
                        return Ok(true);
                    }
                },
                None => {
                    debug!(
                        target: LOG_TARGET,
                        "Remote mechanism {} is no longer offered by forwarder '{}'",
                        dst_mechanism.mechanism_type,
                        forwarder.registered_name
                    );
                    return Ok(true);
                },
            }
        }
        Ok(false)
    }

    /// Keep the existing destination and refresh the caller-facing leg from it.
    async fn update_connection_context(
        &self,
        ctx: &mut RequestContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, RequestError>
    {
        let mut conn = request.connection;
        conn.state = ConnectionState::Up;

        let cc = ctx.client_connection()?;
        let destination = cc
            .destination()
            .cloned()
            .ok_or(RequestError::MissingContext("destination connection"))?;
        let endpoint = cc.endpoint.clone().ok_or(RequestError::MissingContext("endpoint"))?;

        let updated = destination
            .validate_complete()
            .map_err(RequestError::InvalidNseConnection)
            .and_then(|_| match &destination.context {
                Some(context) => conn.update_context(context).map_err(RequestError::ContextUpdate),
                None => Ok(()),
            });
        if let Err(err) = updated {
            if let Err(close_err) = next.close(ctx, conn).await {
                error!(target: LOG_TARGET, "Failed to perform close: {}", close_err);
            }
            return Err(err);
        }

        let local = self.nse_manager.is_local_endpoint(&endpoint);
        let cc = ctx.client_connection_mut()?;
        if let Some(xcon) = cc.xcon.as_mut() {
            xcon.source = conn.clone();
        }
        if !local {
            cc.remote_nsm = Some(endpoint.network_service_manager.clone());
        }
        debug!(target: LOG_TARGET, "Connection '{}' refreshed without contacting the endpoint", conn.id);
        Ok(conn)
    }

    async fn select_endpoint(
        &self,
        ctx: &mut RequestContext,
        request: &NetworkServiceRequest,
        ignored: &HashSet<String>,
    ) -> Result<NseRegistration, RequestError>
    {
        if ctx.existing {
            let cc = ctx.client_connection_mut()?;
            match cc.endpoint.clone() {
                Some(endpoint) if !ignored.contains(&endpoint.endpoint_key()) => return Ok(endpoint),
                _ => {
                    if let Some(dst) = cc.xcon.as_mut().and_then(|x| x.destination.as_mut()) {
                        dst.id = NEW_CONNECTION_ID.to_string();
                    }
                },
            }
        }
        Ok(self.nse_manager.get_endpoint(&request.connection, ignored).await?)
    }
}

#[async_trait]
impl NetworkServiceStage for EndpointSelectorStage {
    async fn request(
        &self,
        ctx: &mut RequestContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, RequestError>
    {
        if ctx.existing {
            let cc = ctx.client_connection()?.clone();
            if !self.nse_request_required(ctx, &request, &cc, next).await? {
                return self.update_connection_context(ctx, request, next).await;
            }
        }

        let mut ignored = HashSet::new();
        let mut last_error: Option<RequestError> = None;
        loop {
            let endpoint = match self.select_endpoint(ctx, &request, &ignored).await {
                Ok(endpoint) => endpoint,
                Err(RequestError::NseManager(err)) if last_error.is_some() => {
                    return Err(RequestError::EndpointExhausted {
                        error: err,
                        last_nse_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
                    });
                },
                Err(err) => return Err(err),
            };

            let mut attempt = request.clone();
            attempt.connection.context.get_or_insert_with(Default::default);
            ctx.endpoint = Some(endpoint.clone());

            match next.request(ctx, attempt).await {
                Ok(conn) => {
                    let local = self.nse_manager.is_local_endpoint(&endpoint);
                    let cc = ctx.client_connection_mut()?;
                    cc.remote_nsm = if local {
                        None
                    } else {
                        Some(endpoint.network_service_manager.clone())
                    };
                    cc.endpoint = Some(endpoint);
                    return Ok(conn);
                },
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        "NSE '{}' responded with error: {}",
                        endpoint.endpoint_name(),
                        err
                    );
                    ignored.insert(endpoint.endpoint_key());
                    last_error = Some(err);
                },
            }
        }
    }

    async fn close(&self, ctx: &mut RequestContext, connection: Connection, next: Next<'_>) -> Result<(), RequestError> {
        next.close(ctx, connection).await
    }
}
