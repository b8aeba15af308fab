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
    clients::{ClientError, ConnectionPlugin, NseClient, PluginVerdict},
    config::NsmConfig,
    connection::{
        params,
        Connection,
        ConnectionState,
        CrossConnect,
        NetworkServiceRequest,
        ValidationError,
        NEW_CONNECTION_ID,
    },
    model::{Forwarder, Model},
    nse_manager::NseManager,
    registry::NseRegistration,
};

const LOG_TARGET: &str = "nsm::pipeline::endpoint";

/// Requests the selected endpoint and builds the cross-connect from the caller-facing connection and the connection
/// returned by the endpoint. This is the last stage of the chain.
pub struct EndpointStage {
    model: Model,
    nse_manager: NseManager,
    plugin: Arc<dyn ConnectionPlugin>,
    config: Arc<NsmConfig>,
}

impl EndpointStage {
    pub fn new(
        model: Model,
        nse_manager: NseManager,
        plugin: Arc<dyn ConnectionPlugin>,
        config: Arc<NsmConfig>,
    ) -> Self
    {
        Self {
            model,
            nse_manager,
            plugin,
            config,
        }
    }

    /// Id of the destination connection to reuse, if this is a re-request towards the same endpoint.
    fn existing_destination_id(&self, ctx: &RequestContext, endpoint: &NseRegistration) -> Option<String> {
        if !ctx.existing {
            return None;
        }
        let cc = ctx.client_connection.as_ref()?;
        let same_endpoint = cc
            .endpoint
            .as_ref()
            .map(|e| e.endpoint_key() == endpoint.endpoint_key())
            .unwrap_or(false);
        if !same_endpoint {
            return None;
        }
        cc.destination()
            .map(|dst| dst.id.clone())
            .filter(|id| id != NEW_CONNECTION_ID)
    }

    fn build_nse_request(
        &self,
        ctx: &RequestContext,
        endpoint: &NseRegistration,
        forwarder: &Forwarder,
        source: &Connection,
    ) -> NetworkServiceRequest
    {
        let existing_id = self.existing_destination_id(ctx, endpoint);
        let network_service = endpoint.network_service.name.clone();
        let (mut connection, mechanisms) = if self.nse_manager.is_local_endpoint(endpoint) {
            let id = existing_id.unwrap_or_else(|| self.model.connection_id());
            (Connection::local(id, network_service), forwarder.local_mechanisms.clone())
        } else {
            let id = existing_id.unwrap_or_else(|| NEW_CONNECTION_ID.to_string());
            let mut connection = Connection::remote(id, network_service, self.model.nsm_name(), endpoint.manager_name());
            connection.network_service_endpoint_name = endpoint.endpoint_name().to_string();
            (connection, forwarder.remote_mechanisms.clone())
        };
        connection.context = source.context.clone();
        connection.labels = source.labels.clone();
        NetworkServiceRequest::new(connection, mechanisms)
    }

    async fn validate_nse_connection(&self, connection: &Connection) -> Result<(), RequestError> {
        connection
            .validate_complete()
            .map_err(RequestError::InvalidNseConnection)?;
        match self.plugin.validate_connection(connection).await {
            PluginVerdict::Accept => Ok(()),
            PluginVerdict::Reject(reason) => Err(RequestError::InvalidNseConnection(
                ValidationError::RejectedByPlugin(reason),
            )),
        }
    }

    async fn request_endpoint(
        &self,
        ctx: &mut RequestContext,
        client: &dyn NseClient,
        endpoint: &NseRegistration,
        request: NetworkServiceRequest,
    ) -> Result<Connection, RequestError>
    {
        let forwarder = ctx.forwarder()?.clone();
        let mut source = request.connection;
        let nse_request = self.build_nse_request(ctx, endpoint, &forwarder, &source);
        debug!(
            target: LOG_TARGET,
            "Requesting {} with connection {}", endpoint, nse_request.connection
        );

        let mut nse_connection = time::timeout(ctx.request_timeout, client.request(nse_request))
            .await
            .unwrap_or(Err(ClientError::Timeout(ctx.request_timeout)))
            .map_err(|error| RequestError::NseRequest {
                endpoint: endpoint.endpoint_name().to_string(),
                error,
            })?;

        let accepted = match self.validate_nse_connection(&nse_connection).await {
            Ok(()) => match &nse_connection.context {
                Some(context) => source.update_context(context).map_err(RequestError::ContextUpdate),
                None => Ok(()),
            },
            Err(err) => Err(err),
        };
        if let Err(err) = accepted {
            warn!(
                target: LOG_TARGET,
                "Endpoint '{}' returned an unusable connection: {}",
                endpoint.endpoint_name(),
                err
            );
            if let Err(close_err) = time::timeout(ctx.request_timeout, client.close(nse_connection))
                .await
                .unwrap_or(Err(ClientError::Timeout(ctx.request_timeout)))
            {
                error!(target: LOG_TARGET, "Failed to close rejected NSE connection: {}", close_err);
            }
            return Err(err);
        }

        if self.nse_manager.is_local_endpoint(endpoint) {
            if let (Some(model_endpoint), Some(mechanism)) = (
                self.model.get_endpoint(endpoint.endpoint_name()),
                nse_connection.mechanism.as_mut(),
            ) {
                mechanism
                    .parameters
                    .insert(params::WORKSPACE.to_string(), model_endpoint.workspace.clone());
                mechanism
                    .parameters
                    .insert(params::WORKSPACE_NSE_NAME.to_string(), model_endpoint.name().to_string());
            }
        }

        source.state = ConnectionState::Up;
        let cc = ctx.client_connection_mut()?;
        let xcon = CrossConnect::new(cc.id(), endpoint.network_service.payload.clone(), source.clone())
            .with_destination(nse_connection);
        debug!(target: LOG_TARGET, "Cross-connect built: {}", xcon);
        cc.xcon = Some(xcon);
        Ok(source)
    }

    async fn close_endpoint_leg(&self, ctx: &RequestContext) -> Result<(), RequestError> {
        let cc = match ctx.client_connection.as_ref() {
            Some(cc) => cc,
            None => return Ok(()),
        };
        let (endpoint, destination) = match (cc.endpoint.as_ref(), cc.destination()) {
            (Some(endpoint), Some(destination)) if destination.id != NEW_CONNECTION_ID => {
                (endpoint, destination.clone())
            },
            _ => return Ok(()),
        };

        let client = self
            .nse_manager
            .create_nse_client(endpoint, ctx.request_timeout)
            .await
            .map_err(RequestError::NseClient)?;
        debug!(
            target: LOG_TARGET,
            "Closing destination connection '{}' on {}", destination.id, endpoint
        );
        let result = time::timeout(ctx.request_timeout, client.close(destination))
            .await
            .unwrap_or(Err(ClientError::Timeout(ctx.request_timeout)))
            .map_err(RequestError::NseClose);
        if let Err(err) = client.cleanup().await {
            debug!(target: LOG_TARGET, "NSE client cleanup failed: {}", err);
        }
        result
    }
}

#[async_trait]
impl NetworkServiceStage for EndpointStage {
    async fn request(
        &self,
        ctx: &mut RequestContext,
        request: NetworkServiceRequest,
        _next: Next<'_>,
    ) -> Result<Connection, RequestError>
    {
        let endpoint = ctx.endpoint()?.clone();
        let connect_timeout = if ctx.healing {
            self.config.heal_request_connect_timeout
        } else {
            ctx.request_timeout
        };
        let client = self
            .nse_manager
            .create_nse_client(&endpoint, connect_timeout)
            .await
            .map_err(RequestError::NseClient)?;
        let result = self.request_endpoint(ctx, client.as_ref(), &endpoint, request).await;
        if let Err(err) = client.cleanup().await {
            debug!(target: LOG_TARGET, "NSE client cleanup failed: {}", err);
        }
        result
    }

    async fn close(&self, ctx: &mut RequestContext, connection: Connection, next: Next<'_>) -> Result<(), RequestError> {
        let endpoint_result = self.close_endpoint_leg(ctx).await;
        let next_result = next.close(ctx, connection).await;
        RequestError::combine_close_results(vec![endpoint_result, next_result])
    }
}
