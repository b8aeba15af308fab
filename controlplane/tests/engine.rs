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

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use nsm_controlplane::{
    clients::{NoopPlugin, StaticPrefixPool},
    heal::HealTrigger,
    mechanism::SequentialVniAllocator,
    model::ClientConnectionState,
    monitor::{EventType, MonitorEvent},
    test_utils::{
        factories,
        mocks::{DiscoveryMock, EndpointMonitorMock, ForwarderMock, NseConnectorMock, RemoteMonitorMock},
    },
    ConnectionEngine,
    EngineClients,
};
use nsm_test_utils::{async_assert_eventually, collect_stream};

struct TestNode {
    engine: ConnectionEngine,
    discovery: DiscoveryMock,
    forwarder: ForwarderMock,
    nse: NseConnectorMock,
}

async fn spawn_node() -> TestNode {
    let _ = env_logger::try_init();
    let discovery = DiscoveryMock::new();
    let forwarder = ForwarderMock::new();
    let nse = NseConnectorMock::new();
    let engine = ConnectionEngine::spawn(factories::test_config(), factories::nsm("nsm-1"), EngineClients {
        discovery: Arc::new(discovery.clone()),
        nse_connector: Arc::new(nse.clone()),
        forwarder: Arc::new(forwarder.clone()),
        remote_monitor: Arc::new(RemoteMonitorMock::new()),
        endpoint_monitor: Arc::new(EndpointMonitorMock::new()),
        prefix_pool: Arc::new(StaticPrefixPool::new(vec!["10.96.0.0/12"])),
        plugin: Arc::new(NoopPlugin),
        vni_allocator: Arc::new(SequentialVniAllocator::new()),
        endpoint_selector: None,
        registry_file: None,
    });

    factories::add_forwarder(engine.model(), "fwd-1");
    let node = TestNode {
        engine,
        discovery,
        forwarder,
        nse,
    };
    node.add_endpoint("nse-a").await;
    async_assert_eventually!(
        node.forwarder.is_monitored("fwd-1").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
    node
}

impl TestNode {
    async fn add_endpoint(&self, name: &str) {
        let endpoint = factories::add_local_endpoint(self.engine.model(), name, "icmp");
        self.discovery.add_registration(endpoint.registration).await;
    }

    async fn remove_endpoint(&self, name: &str) {
        self.engine.model().delete_endpoint(name);
        self.discovery.remove_endpoint(name).await;
    }
}

#[tokio::test]
async fn local_request_creates_one_ready_connection() {
    let node = spawn_node().await;

    let connection = node.engine.request(factories::local_request("icmp")).await.unwrap();

    let connections = node.engine.model().get_all_client_connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].id(), connection.id);
    assert_eq!(connections[0].state(), ClientConnectionState::Ready);
    assert_eq!(connections[0].endpoint_name(), Some("nse-a"));
    assert!(node.forwarder.programmed("fwd-1").await.contains_key(&connection.id));
    assert_eq!(node.nse.active_connections("nse-a").await.len(), 1);
}

#[tokio::test]
async fn dst_down_heals_to_the_other_local_endpoint() {
    let node = spawn_node().await;
    let connection = node.engine.request(factories::local_request("icmp")).await.unwrap();
    let cc = node.engine.model().get_client_connection(&connection.id).unwrap();

    node.remove_endpoint("nse-a").await;
    node.add_endpoint("nse-b").await;
    let outcome = node
        .engine
        .heal_requester()
        .heal_and_wait(cc, HealTrigger::DstDown)
        .await
        .unwrap();

    assert!(outcome.is_healed());
    let healed = node.engine.model().get_client_connection(&connection.id).unwrap();
    assert_eq!(healed.endpoint_name(), Some("nse-b"));
    assert_eq!(healed.state(), ClientConnectionState::Ready);
    assert!(node.engine.model().get_endpoint("nse-a").is_none());
}

#[tokio::test]
async fn dst_down_without_alternative_removes_the_connection() {
    let node = spawn_node().await;
    let connection = node.engine.request(factories::local_request("icmp")).await.unwrap();
    let cc = node.engine.model().get_client_connection(&connection.id).unwrap();

    node.remove_endpoint("nse-a").await;
    let outcome = node
        .engine
        .heal_requester()
        .heal_and_wait(cc, HealTrigger::DstDown)
        .await
        .unwrap();

    assert!(outcome.is_closed());
    assert!(node.engine.model().get_client_connection(&connection.id).is_none());
    assert!(node.forwarder.programmed("fwd-1").await.is_empty());
}

#[tokio::test]
async fn connection_survives_forwarder_replacement() {
    let node = spawn_node().await;
    let connection = node.engine.request(factories::local_request("icmp")).await.unwrap();

    node.engine.model().delete_forwarder("fwd-1");
    factories::add_forwarder(node.engine.model(), "fwd-2");

    async_assert_eventually!(
        node.engine
            .model()
            .get_client_connection(&connection.id)
            .map(|cc| (cc.forwarder_registered_name.clone(), cc.state())),
        expect = Some(("fwd-2".to_string(), ClientConnectionState::Ready)),
        max_attempts = 40,
        interval = Duration::from_millis(25)
    );
    assert!(node.forwarder.programmed("fwd-2").await.contains_key(&connection.id));
}

#[tokio::test]
async fn subscribers_receive_the_snapshot_first() {
    let node = spawn_node().await;
    let connection = node.engine.request(factories::local_request("icmp")).await.unwrap();
    let xcon = node
        .engine
        .model()
        .get_client_connection(&connection.id)
        .and_then(|cc| cc.xcon)
        .unwrap();
    node.forwarder
        .publish("fwd-1", MonitorEvent::new(EventType::Update, Some(xcon.clone())))
        .await;
    async_assert_eventually!(
        node.engine
            .subscribe_cross_connects()
            .await
            .unwrap()
            .next()
            .await
            .map(|event| event.entities.len()),
        expect = Some(1),
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    let subscription = node.engine.subscribe_cross_connects().await.unwrap();
    node.forwarder
        .publish("fwd-1", MonitorEvent::new(EventType::Update, Some(xcon)))
        .await;

    let events = collect_stream!(subscription, take = 2, timeout = Duration::from_secs(1));
    assert_eq!(events[0].event_type, EventType::InitialStateTransfer);
    assert!(events[0].entities.contains_key(&connection.id));
    assert_eq!(events[1].event_type, EventType::Update);
}

#[tokio::test]
async fn close_removes_the_connection_everywhere() {
    let node = spawn_node().await;
    let connection = node.engine.request(factories::local_request("icmp")).await.unwrap();

    node.engine.close(&connection.id).await.unwrap();

    assert!(node.engine.model().get_client_connection(&connection.id).is_none());
    assert!(node.forwarder.programmed("fwd-1").await.is_empty());
    assert!(node.nse.active_connections("nse-a").await.is_empty());
    async_assert_eventually!(
        node.engine.client_connection_manager().is_connection_deleted(&connection.id),
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
}

#[tokio::test]
async fn shutdown_stops_monitoring() {
    let node = spawn_node().await;
    let signal = node.engine.shutdown_signal();
    node.engine.shutdown();
    signal.await;
    async_assert_eventually!(
        node.forwarder.is_monitored("fwd-1").await,
        expect = false,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
}
