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

use async_trait::async_trait;
use log::*;

use super::{NetworkServiceStage, Next, RequestContext, RequestError};
use crate::{
    connection::{Connection, NetworkServiceRequest},
    model::{ClientConnection, ClientConnectionEditor, ClientConnectionState, Model, ModelError},
};

const LOG_TARGET: &str = "nsm::pipeline::connection";

/// Creates the client connection for new requests, moves existing ones through the state table and commits the
/// working copy once the rest of the chain succeeds.
pub struct ConnectionStage {
    model: Model,
}

impl ConnectionStage {
    pub fn new(model: Model) -> Self {
        Self { model }
    }

    fn begin(
        &self,
        ctx: &mut RequestContext,
        request: &mut NetworkServiceRequest,
    ) -> Result<ClientConnectionEditor, RequestError>
    {
        if ctx.healing {
            let id = ctx.client_connection()?.id().to_string();
            let editor = self
                .model
                .compare_and_change_state(&id, ClientConnectionState::Healing, ClientConnectionState::Requesting)
                .map_err(|err| match err {
                    ModelError::UnknownConnection(id) => RequestError::UnknownConnection(id),
                    err => err.into(),
                })?;
            request.connection.id = id;
            return Ok(editor);
        }

        let id = request.connection.id.clone();
        if let Some(existing) = self.model.get_client_connection(&id).filter(|_| !id.is_empty()) {
            let from = match existing.state() {
                ClientConnectionState::Ready => ClientConnectionState::Ready,
                // The remote source re-requests a connection that lost its monitor
                ClientConnectionState::Healing if existing.has_remote_source() && request.is_remote() => {
                    ClientConnectionState::Healing
                },
                state => return Err(RequestError::ConnectionInProgress { id, state }),
            };
            debug!(target: LOG_TARGET, "Updating existing connection {}", existing);
            let editor = self
                .model
                .compare_and_change_state(&id, from, ClientConnectionState::Requesting)?;
            ctx.existing = true;
            ctx.client_connection = Some(editor.connection.clone());
            return Ok(editor);
        }

        let id = self.model.connection_id();
        request.connection.id = id.clone();
        let editor = self
            .model
            .add_client_connection(ClientConnection::new(id), ClientConnectionState::Requesting)?;
        ctx.client_connection = Some(editor.connection.clone());
        Ok(editor)
    }

    fn complete(&self, ctx: &RequestContext, mut editor: ClientConnectionEditor) -> Result<(), RequestError> {
        editor.connection = ctx.client_connection()?.clone();
        self.model.commit_client_connection_changes(&editor)?;
        self.model
            .compare_and_change_state(editor.id(), ClientConnectionState::Requesting, ClientConnectionState::Ready)?;
        Ok(())
    }

    fn abort(&self, ctx: &RequestContext, id: &str) {
        if ctx.healing {
            // The heal processor decides what happens to the connection
            if let Err(err) = self.model.compare_and_change_state(
                id,
                ClientConnectionState::Requesting,
                ClientConnectionState::Broken,
            ) {
                debug!(target: LOG_TARGET, "Could not mark connection '{}' broken: {}", id, err);
            }
        } else {
            self.model.delete_client_connection(id);
        }
    }
}

#[async_trait]
impl NetworkServiceStage for ConnectionStage {
    async fn request(
        &self,
        ctx: &mut RequestContext,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, RequestError>
    {
        let editor = self.begin(ctx, &mut request)?;
        let id = editor.id().to_string();
        ctx.client_connection_mut()?.request = Some(request.clone());

        let result = next.request(ctx, request).await;
        let result = match result {
            Ok(conn) => self.complete(ctx, editor).map(|_| conn),
            Err(err) => Err(err),
        };

        match result {
            Ok(conn) => {
                debug!(target: LOG_TARGET, "Connection '{}' is Ready", id);
                Ok(conn)
            },
            Err(err) => {
                warn!(target: LOG_TARGET, "Request for connection '{}' failed: {}", id, err);
                self.abort(ctx, &id);
                Err(err)
            },
        }
    }

    async fn close(&self, ctx: &mut RequestContext, connection: Connection, next: Next<'_>) -> Result<(), RequestError> {
        let id = connection.id.clone();
        let cc = self
            .model
            .get_client_connection(&id)
            .ok_or_else(|| RequestError::UnknownConnection(id.clone()))?;
        if cc.state().is_closing() {
            return Err(RequestError::AlreadyClosing(id));
        }
        let editor = self
            .model
            .compare_and_change_state(&id, cc.state(), ClientConnectionState::Closing)?;
        ctx.client_connection = Some(editor.connection);

        let result = next.close(ctx, connection).await;
        if let Err(err) = &result {
            error!(target: LOG_TARGET, "Errors closing connection '{}': {}", id, err);
        }
        self.model.delete_client_connection(&id);
        info!(target: LOG_TARGET, "Connection '{}' closed", id);
        result
    }
}
