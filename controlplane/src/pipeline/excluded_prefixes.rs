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
    clients::PrefixPool,
    connection::{parse_address, Connection, NetworkServiceRequest},
};

const LOG_TARGET: &str = "nsm::pipeline::excluded_prefixes";

/// Tells endpoints which prefixes must not be handed out and rejects connections whose addresses fall inside them.
pub struct ExcludedPrefixesStage {
    pool: Arc<dyn PrefixPool>,
}

impl ExcludedPrefixesStage {
    pub fn new(pool: Arc<dyn PrefixPool>) -> Self {
        Self { pool }
    }

    fn validate(&self, connection: &Connection) -> Result<(), RequestError> {
        let ip = match &connection.context {
            Some(context) => &context.ip_context,
            None => return Ok(()),
        };
        for (field, value) in [("srcIP", &ip.src_ip_addr), ("dstIP", &ip.dst_ip_addr)] {
            if value.is_empty() {
                continue;
            }
            let addr = parse_address(field, value)?;
            if self.pool.intersects(&addr) {
                return Err(RequestError::ExcludedPrefix {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkServiceStage for ExcludedPrefixesStage {
    async fn request(
        &self,
        ctx: &mut RequestContext,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, RequestError>
    {
        let prefixes = self.pool.prefixes();
        if !prefixes.is_empty() {
            let excluded = &mut request
                .connection
                .context
                .get_or_insert_with(Default::default)
                .ip_context
                .excluded_prefixes;
            for prefix in prefixes {
                if !excluded.contains(&prefix) {
                    excluded.push(prefix);
                }
            }
        }

        let conn = next.request(ctx, request).await?;
        if let Err(err) = self.validate(&conn) {
            warn!(target: LOG_TARGET, "Endpoint connection rejected: {}", err);
            if let Err(close_err) = next.close(ctx, conn).await {
                error!(target: LOG_TARGET, "Failed to close rejected endpoint leg: {}", close_err);
            }
            return Err(err);
        }
        Ok(conn)
    }

    async fn close(&self, ctx: &mut RequestContext, connection: Connection, next: Next<'_>) -> Result<(), RequestError> {
        next.close(ctx, connection).await
    }
}
