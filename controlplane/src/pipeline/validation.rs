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

use super::{NetworkServiceStage, Next, RequestContext, RequestError};
use crate::{
    clients::ConnectionPlugin,
    connection::{Connection, NetworkServiceRequest},
};

const LOG_TARGET: &str = "nsm::pipeline::validation";

/// Rejects malformed requests and lets the connection plugin adjust the request connection.
pub struct ValidationStage {
    plugin: Arc<dyn ConnectionPlugin>,
}

impl ValidationStage {
    pub fn new(plugin: Arc<dyn ConnectionPlugin>) -> Self {
        Self { plugin }
    }
}

#[async_trait]
impl NetworkServiceStage for ValidationStage {
    async fn request(
        &self,
        ctx: &mut RequestContext,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, RequestError>
    {
        if let Err(err) = request.validate() {
            debug!(target: LOG_TARGET, "Rejecting request {}: {}", request.connection, err);
            return Err(err.into());
        }
        request.connection = self.plugin.update_connection(request.connection).await;
        next.request(ctx, request).await
    }

    async fn close(&self, ctx: &mut RequestContext, connection: Connection, next: Next<'_>) -> Result<(), RequestError> {
        next.close(ctx, connection).await
    }
}
