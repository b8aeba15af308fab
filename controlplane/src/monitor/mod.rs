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

//! # Monitor
//!
//! Two [MonitorServer]s keep a snapshot of live entities and stream changes to subscribers: the cross-connect monitor
//! for local watchers and the connection monitor for remote managers. Every subscriber first receives an
//! INITIAL_STATE_TRANSFER with the snapshot in its scope, then UPDATE and DELETE events in the order they were applied.
//!
//! The [CrossConnectMonitorClient] feeds both servers. It follows the model, runs a cross-connect monitor per forwarder
//! and a connection monitor per remote manager that a live connection depends on, and reports what it sees to the
//! [ClientConnectionManager](crate::client_connection_manager::ClientConnectionManager).

mod client;
mod error;
mod event;
mod server;

#[cfg(test)]
mod test;

pub use self::{
    client::{CrossConnectMonitorActor, CrossConnectMonitorClient},
    error::MonitorError,
    event::{ConnectionEvent, CrossConnectEvent, EventType, MonitorEntity, MonitorEvent},
    server::{
        spawn_monitor_server,
        MonitorRequest,
        MonitorRequester,
        MonitorServer,
        MonitorServerActor,
        MonitorSubscription,
    },
};
