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

//! # Network service mesh connection lifecycle engine
//!
//! This crate resolves network service requests to concrete endpoints, programs the local forwarder with the
//! resulting cross-connect, keeps every client connection in an in-memory [Model](crate::model::Model) and heals
//! connections when an endpoint, forwarder or remote manager goes away.
//!
//! The main entry point is [ConnectionEngine](crate::engine::ConnectionEngine), which wires the
//! [request pipeline](crate::pipeline), the [heal processor](crate::heal), the
//! [client connection manager](crate::client_connection_manager) and the [monitors](crate::monitor) together.
//! All transports (discovery, endpoints, forwarders, remote managers) are injected through the traits in
//! [clients](crate::clients).

#[macro_use]
mod macros;

pub mod clients;
pub mod client_connection_manager;
pub mod config;
pub mod connection;
pub mod engine;
pub mod heal;
pub mod mechanism;
pub mod model;
pub mod monitor;
pub mod nse_manager;
pub mod pipeline;
pub mod registry;

#[cfg(any(test, feature = "test-mocks"))]
pub mod test_utils;

pub use config::NsmConfig;
pub use engine::{ConnectionEngine, EngineClients};
