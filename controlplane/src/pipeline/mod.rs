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

//! # Request pipeline
//!
//! A Request or Close call is processed by a chain of [NetworkServiceStage]s. Each stage handles one concern and hands
//! over to the rest of the chain through [Next]:
//!
//! 1. [ValidationStage] rejects malformed requests before any side effect
//! 1. [ConnectionStage] creates, updates and removes the client connection in the model
//! 1. [ForwarderStage] selects the forwarder and mechanism and programs the forwarder with the cross-connect
//! 1. [ExcludedPrefixesStage] adds excluded prefixes and rejects endpoint addresses that fall inside them
//! 1. [EndpointSelectorStage] resolves an endpoint, retrying with the next candidate on failure
//! 1. [EndpointStage] requests the endpoint and builds the cross-connect
//!
//! Stages share state through a [RequestContext] owned by the call.

mod connection;
mod endpoint;
mod endpoint_selector;
mod error;
mod excluded_prefixes;
mod forwarder;
mod validation;


use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

pub use self::{
    connection::ConnectionStage,
    endpoint::EndpointStage,
    endpoint_selector::EndpointSelectorStage,
    error::RequestError,
    excluded_prefixes::ExcludedPrefixesStage,
    forwarder::ForwarderStage,
    validation::ValidationStage,
};
use crate::{
    clients::{ConnectionPlugin, ForwarderClient, PrefixPool},
    config::NsmConfig,
    connection::{Connection, NetworkServiceRequest},
    mechanism::MechanismSelector,
    model::{ClientConnection, Forwarder, Model},
    nse_manager::NseManager,
    registry::NseRegistration,
};

/// State shared by the stages of one Request or Close call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Working copy of the model connection, committed back by the [ConnectionStage]
    pub client_connection: Option<ClientConnection>,
    pub forwarder: Option<Forwarder>,
    /// Endpoint chosen for the current attempt
    pub endpoint: Option<NseRegistration>,
    /// An existing connection is being re-requested (update or heal)
    pub existing: bool,
    /// The re-request comes from the heal processor, which owns the connection's state
    pub healing: bool,
    /// The destination is known to be gone and the endpoint must be requested again
    pub nse_request_required: bool,
    /// Bound on each call to an endpoint
    pub request_timeout: Duration,
}

impl RequestContext {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client_connection: None,
            forwarder: None,
            endpoint: None,
            existing: false,
            healing: false,
            nse_request_required: false,
            request_timeout,
        }
    }

    pub fn client_connection(&self) -> Result<&ClientConnection, RequestError> {
        self.client_connection
            .as_ref()
            .ok_or(RequestError::MissingContext("client connection"))
    }

    pub fn client_connection_mut(&mut self) -> Result<&mut ClientConnection, RequestError> {
        self.client_connection
            .as_mut()
            .ok_or(RequestError::MissingContext("client connection"))
    }

    pub fn forwarder(&self) -> Result<&Forwarder, RequestError> {
        self.forwarder.as_ref().ok_or(RequestError::MissingContext("forwarder"))
    }

    pub fn endpoint(&self) -> Result<&NseRegistration, RequestError> {
        self.endpoint.as_ref().ok_or(RequestError::MissingContext("endpoint"))
    }
}

#[async_trait]
pub trait NetworkServiceStage: Send + Sync {
    async fn request(
        &self,
        ctx: &mut RequestContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, RequestError>;

    async fn close(&self, ctx: &mut RequestContext, connection: Connection, next: Next<'_>) -> Result<(), RequestError>;
}

/// The remainder of the chain after the current stage. The end of the chain returns the request connection.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn NetworkServiceStage>],
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Arc<dyn NetworkServiceStage>]) -> Self {
        Self { stages }
    }

    pub async fn request(
        self,
        ctx: &mut RequestContext,
        request: NetworkServiceRequest,
    ) -> Result<Connection, RequestError>
    {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.request(ctx, request, Next::new(rest)).await,
            None => Ok(request.connection),
        }
    }

    pub async fn close(self, ctx: &mut RequestContext, connection: Connection) -> Result<(), RequestError> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.close(ctx, connection, Next::new(rest)).await,
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Next({} stage(s))", self.stages.len())
    }
}

/// Everything the standard chain of stages needs.
#[derive(Clone)]
pub struct PipelineDependencies {
    pub model: Model,
    pub nse_manager: NseManager,
    pub forwarder_client: Arc<dyn ForwarderClient>,
    pub mechanism_selector: MechanismSelector,
    pub prefix_pool: Arc<dyn PrefixPool>,
    pub plugin: Arc<dyn ConnectionPlugin>,
    pub config: Arc<NsmConfig>,
}

#[derive(Clone)]
pub struct RequestPipeline {
    stages: Arc<Vec<Arc<dyn NetworkServiceStage>>>,
    model: Model,
    config: Arc<NsmConfig>,
}

impl RequestPipeline {
    pub fn new(stages: Vec<Arc<dyn NetworkServiceStage>>, model: Model, config: Arc<NsmConfig>) -> Self {
        Self {
            stages: Arc::new(stages),
            model,
            config,
        }
    }

    /// Build the standard chain of stages.
    pub fn build(deps: PipelineDependencies) -> Self {
        let stages: Vec<Arc<dyn NetworkServiceStage>> = vec![
            Arc::new(ValidationStage::new(deps.plugin.clone())),
            Arc::new(ConnectionStage::new(deps.model.clone())),
            Arc::new(ForwarderStage::new(
                deps.model.clone(),
                deps.forwarder_client,
                deps.mechanism_selector,
                deps.config.clone(),
            )),
            Arc::new(ExcludedPrefixesStage::new(deps.prefix_pool)),
            Arc::new(EndpointSelectorStage::new(deps.nse_manager.clone())),
            Arc::new(EndpointStage::new(deps.model.clone(), deps.nse_manager, deps.plugin, deps.config.clone())),
        ];
        Self::new(stages, deps.model, deps.config)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Process a request from a client or a remote manager. A request carrying the id of an existing connection
    /// updates that connection.
    pub async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, RequestError> {
        let mut ctx = RequestContext::new(self.config.request_timeout);
        Next::new(&self.stages).request(&mut ctx, request).await
    }

    /// Re-request an existing connection on behalf of the heal processor. The connection must be in the model in the
    /// Healing state; the given copy carries the changes the heal decided on (endpoint, destination id).
    pub async fn request_existing(
        &self,
        request: NetworkServiceRequest,
        existing: ClientConnection,
        nse_request_required: bool,
    ) -> Result<Connection, RequestError>
    {
        let mut ctx = RequestContext::new(self.config.heal_request_timeout);
        ctx.client_connection = Some(existing);
        ctx.existing = true;
        ctx.healing = true;
        ctx.nse_request_required = nse_request_required;
        Next::new(&self.stages).request(&mut ctx, request).await
    }

    /// Close the connection with the given id. The connection is removed from the model even if closing one of its
    /// legs fails.
    pub async fn close(&self, id: &str) -> Result<(), RequestError> {
        let cc = self
            .model
            .get_client_connection(id)
            .ok_or_else(|| RequestError::UnknownConnection(id.to_string()))?;
        let connection = cc
            .source()
            .cloned()
            .or_else(|| cc.request.as_ref().map(|r| r.connection.clone()))
            .unwrap_or_else(|| Connection::local(id, cc.network_service()));
        let mut ctx = RequestContext::new(self.config.close_timeout);
        Next::new(&self.stages).close(&mut ctx, Connection { id: id.to_string(), ..connection }).await
    }
}
