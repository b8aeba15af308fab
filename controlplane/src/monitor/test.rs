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
use nsm_shutdown::Shutdown;
use nsm_test_utils::async_assert_eventually;
use tokio::{sync::mpsc, time};

use super::{client::PeersHandle, *};
use crate::{
    client_connection_manager::ClientConnectionManager,
    clients::{NoopPlugin, StaticPrefixPool},
    config::NsmConfig,
    connection::{Connection, ConnectionState, CrossConnect},
    heal::{HealProcessor, HealRequest, HealRequester, HealTrigger},
    mechanism::{MechanismSelector, SequentialVniAllocator},
    model::{ClientConnection, ClientConnectionState, Model},
    nse_manager::{NseManager, RoundRobinSelector},
    pipeline::{PipelineDependencies, RequestPipeline},
    test_utils::{
        factories,
        mocks::{DiscoveryMock, EndpointMonitorMock, ForwarderMock, NseConnectorMock, RemoteMonitorMock},
    },
};

struct Harness {
    model: Model,
    pipeline: RequestPipeline,
    ccm: ClientConnectionManager,
    discovery: DiscoveryMock,
    forwarder: ForwarderMock,
    remote_monitor: RemoteMonitorMock,
    endpoint_monitor: EndpointMonitorMock,
    /// Heal requests, when the harness runs without a heal processor
    heal_queue: Option<mpsc::Receiver<HealRequest>>,
    cross_connects: MonitorRequester<CrossConnect>,
    connections: MonitorRequester<Connection>,
    peers: PeersHandle,
    _shutdown: Shutdown,
}

async fn setup() -> Harness {
    setup_with_healing(true).await
}

async fn setup_with_healing(healing: bool) -> Harness {
    let _ = env_logger::try_init();
    let config = Arc::new(NsmConfig {
        heal_timeout: Duration::from_millis(200),
        ..factories::test_config()
    });
    let model = Model::new(factories::nsm("nsm-1"));
    let discovery = DiscoveryMock::new();
    let forwarder = ForwarderMock::new();
    let remote_monitor = RemoteMonitorMock::new();
    let endpoint_monitor = EndpointMonitorMock::new();
    let vni_allocator = Arc::new(SequentialVniAllocator::new());
    let nse_manager = NseManager::new(
        model.clone(),
        Arc::new(discovery.clone()),
        Arc::new(NseConnectorMock::new()),
        Arc::new(RoundRobinSelector::new()),
        config.clone(),
    );
    let pipeline = RequestPipeline::build(PipelineDependencies {
        model: model.clone(),
        nse_manager: nse_manager.clone(),
        forwarder_client: Arc::new(forwarder.clone()),
        mechanism_selector: MechanismSelector::new(vni_allocator.clone()),
        prefix_pool: Arc::new(StaticPrefixPool::new(Vec::<String>::new())),
        plugin: Arc::new(NoopPlugin),
        config: config.clone(),
    });

    let shutdown = Shutdown::new();
    let (heal_tx, heal_rx) = mpsc::channel(10);
    let heal_queue = if healing {
        HealProcessor {
            config: config.clone(),
            model: model.clone(),
            pipeline: pipeline.clone(),
            nse_manager: nse_manager.clone(),
            request_rx: heal_rx,
            shutdown_signal: shutdown.to_signal(),
        }
        .create()
        .spawn();
        None
    } else {
        Some(heal_rx)
    };
    let ccm = ClientConnectionManager::new(
        model.clone(),
        pipeline.clone(),
        HealRequester::new(heal_tx),
        nse_manager,
        Arc::new(discovery.clone()),
        vni_allocator,
        config,
    );

    let cross_connects = spawn_monitor_server("cross-connect", 10, shutdown.to_signal());
    let connections = spawn_monitor_server("connection", 10, shutdown.to_signal());
    let actor = CrossConnectMonitorClient {
        model: model.clone(),
        ccm: ccm.clone(),
        forwarder_client: Arc::new(forwarder.clone()),
        remote_monitor: Arc::new(remote_monitor.clone()),
        endpoint_monitor: Arc::new(endpoint_monitor.clone()),
        cross_connect_monitor: cross_connects.clone(),
        connection_monitor: connections.clone(),
        shutdown_signal: shutdown.to_signal(),
    }
    .create();
    let peers = actor.peers_handle();
    actor.spawn();

    factories::add_forwarder(&model, "fwd-1");
    let endpoint = factories::add_local_endpoint(&model, "nse-a", "icmp");
    discovery.add_registration(endpoint.registration).await;

    let harness = Harness {
        model,
        pipeline,
        ccm,
        discovery,
        forwarder,
        remote_monitor,
        endpoint_monitor,
        heal_queue,
        cross_connects,
        connections,
        peers,
        _shutdown: shutdown,
    };
    async_assert_eventually!(
        harness.forwarder.is_monitored("fwd-1").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
    harness
}

impl Harness {
    async fn establish(&self) -> ClientConnection {
        let conn = self.pipeline.request(factories::local_request("icmp")).await.unwrap();
        self.model.get_client_connection(&conn.id).unwrap()
    }

    /// Establish a connection to an endpoint on the remote manager `nsm-2`.
    async fn establish_remote(&self) -> ClientConnection {
        self.model.delete_endpoint("nse-a");
        self.discovery.remove_endpoint("nse-a").await;
        self.discovery
            .add_registration(factories::registration("nse-r", "icmp", "nsm-2"))
            .await;
        self.establish().await
    }

    async fn next_heal_trigger(&mut self) -> HealTrigger {
        let queue = self.heal_queue.as_mut().expect("harness runs without healing");
        time::timeout(Duration::from_secs(1), queue.recv())
            .await
            .expect("no heal request within 1s")
            .expect("heal queue closed")
            .trigger
    }

    fn state_of(&self, id: &str) -> Option<ClientConnectionState> {
        self.model.get_client_connection(id).map(|cc| cc.state())
    }
}

#[tokio::test]
async fn forwarder_updates_are_published_and_applied() {
    let harness = setup().await;
    let cc = harness.establish().await;
    let mut subscription = harness.cross_connects.subscribe("").await.unwrap();
    assert!(subscription.next().await.unwrap().event_type.is_initial_state_transfer());

    let mut xcon = cc.xcon.clone().unwrap();
    xcon.source.state = ConnectionState::Down;
    harness
        .forwarder
        .publish("fwd-1", MonitorEvent::new(EventType::Update, Some(xcon)))
        .await;

    let update = subscription.next().await.unwrap();
    assert!(update.event_type.is_update());
    assert!(update.entities[cc.id()].source.state.is_down());
    async_assert_eventually!(
        harness.state_of(cc.id()),
        expect = None::<ClientConnectionState>,
        max_attempts = 20,
        interval = Duration::from_millis(25)
    );
}

#[tokio::test]
async fn forwarder_delete_is_published_only_for_closing_connections() {
    let harness = setup().await;
    let cc = harness.establish().await;
    let xcon = cc.xcon.clone().unwrap();
    harness
        .forwarder
        .publish("fwd-1", MonitorEvent::new(EventType::Update, Some(xcon.clone())))
        .await;
    async_assert_eventually!(
        harness.cross_connects.get_entities().await.unwrap().len(),
        expect = 1,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    harness
        .forwarder
        .publish("fwd-1", MonitorEvent::new(EventType::Delete, Some(xcon.clone())))
        .await;
    time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.cross_connects.get_entities().await.unwrap().len(), 1);

    harness
        .model
        .change_client_connection_state(cc.id(), ClientConnectionState::Closing)
        .unwrap();
    harness
        .forwarder
        .publish("fwd-1", MonitorEvent::new(EventType::Delete, Some(xcon)))
        .await;
    async_assert_eventually!(
        harness.cross_connects.get_entities().await.unwrap().is_empty(),
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
}

#[tokio::test]
async fn broken_forwarder_stream_moves_connections_to_another_forwarder() {
    let harness = setup().await;
    let cc = harness.establish().await;
    factories::add_forwarder(&harness.model, "fwd-2");

    harness.forwarder.break_monitor("fwd-1").await;

    async_assert_eventually!(
        harness.model.get_forwarder("fwd-1").is_none(),
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(25)
    );
    async_assert_eventually!(
        harness
            .model
            .get_client_connection(cc.id())
            .map(|c| (c.forwarder_registered_name.clone(), c.state())),
        expect = Some(("fwd-2".to_string(), ClientConnectionState::Ready)),
        max_attempts = 40,
        interval = Duration::from_millis(25)
    );
}

#[tokio::test]
async fn initial_state_transfer_restores_connections() {
    let harness = setup().await;
    let mut source = Connection::local("41", "icmp");
    source.mechanism = Some(factories::kernel_mechanism());
    source.context = Some(Default::default());
    let xcon = CrossConnect::new("41", "IP", source).with_destination(Connection::local("7", "icmp"));

    harness
        .forwarder
        .publish("fwd-1", MonitorEvent::new(EventType::InitialStateTransfer, Some(xcon)))
        .await;

    assert!(harness.ccm.wait_state_restored(Duration::from_secs(1)).await);
    async_assert_eventually!(
        harness.cross_connects.get_entities().await.unwrap().len(),
        expect = 1,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
}

#[tokio::test]
async fn remote_managers_are_monitored_while_connections_use_them() {
    let harness = setup().await;
    let first = harness.establish_remote().await;
    let second = harness.establish().await;
    async_assert_eventually!(
        harness.peers.connection_count("nsm-2"),
        expect = 2,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
    async_assert_eventually!(
        harness.remote_monitor.is_monitoring("nsm-2").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
    assert_eq!(harness.remote_monitor.count_calls_containing("monitor:nsm-2:nsm-1").await, 1);

    harness.pipeline.close(first.id()).await.unwrap();
    async_assert_eventually!(
        harness.peers.connection_count("nsm-2"),
        expect = 1,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
    assert!(harness.peers.is_monitored("nsm-2"));

    harness.pipeline.close(second.id()).await.unwrap();
    async_assert_eventually!(
        harness.peers.is_monitored("nsm-2"),
        expect = false,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
    async_assert_eventually!(
        harness.remote_monitor.is_monitoring("nsm-2").await,
        expect = false,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    // A new connection starts a fresh monitor
    harness.establish().await;
    async_assert_eventually!(
        harness.remote_monitor.count_calls_containing("monitor:nsm-2").await,
        expect = 2,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
}

#[tokio::test]
async fn remote_delete_marks_destination_down() {
    let harness = setup().await;
    let cc = harness.establish_remote().await;
    async_assert_eventually!(
        harness.remote_monitor.is_monitoring("nsm-2").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
    let mut subscription = harness.cross_connects.subscribe("").await.unwrap();
    subscription.next().await.unwrap();

    let destination = cc.destination().unwrap().clone();
    harness
        .remote_monitor
        .publish("nsm-2", MonitorEvent::new(EventType::Delete, Some(destination)))
        .await;

    let update = subscription.next().await.unwrap();
    assert!(update.event_type.is_update());
    let published = &update.entities[cc.id()];
    assert!(published.destination.as_ref().unwrap().state.is_down());
}

#[tokio::test]
async fn lost_remote_manager_heals_its_connections() {
    let harness = setup().await;
    let cc = harness.establish_remote().await;
    async_assert_eventually!(
        harness.remote_monitor.is_monitoring("nsm-2").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    // The endpoint is gone for good, so healing ends with the connection closed
    harness.discovery.remove_endpoint("nse-r").await;
    harness.remote_monitor.set_unreachable("nsm-2").await;
    harness.remote_monitor.close_stream("nsm-2").await;

    async_assert_eventually!(
        harness.state_of(cc.id()),
        expect = None::<ClientConnectionState>,
        max_attempts = 100,
        interval = Duration::from_millis(25)
    );
    async_assert_eventually!(
        harness.peers.is_monitored("nsm-2"),
        expect = false,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
}

#[tokio::test]
async fn connections_from_remote_sources_are_published() {
    let harness = setup().await;
    let source = Connection::remote("s1", "icmp", "nsm-3", "nsm-1");
    let mut cc = ClientConnection::new("5");
    cc.xcon = Some(CrossConnect::new("5", "IP", source.clone()).with_destination(Connection::local("d", "icmp")));
    harness
        .model
        .add_client_connection(cc, ClientConnectionState::Ready)
        .unwrap();

    let mut subscription = harness.connections.subscribe("nsm-3").await.unwrap();
    async_assert_eventually!(
        harness.connections.get_entities().await.unwrap().len(),
        expect = 1,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
    let initial = subscription.next().await.unwrap();
    assert!(initial.event_type.is_initial_state_transfer());

    harness.model.delete_client_connection("5");
    let mut delete = subscription.next().await.unwrap();
    if delete.event_type.is_update() {
        delete = subscription.next().await.unwrap();
    }
    assert!(delete.event_type.is_delete());
    assert!(delete.entities.contains_key("s1"));
    assert!(harness.ccm.is_connection_deleted("5"));
}

#[tokio::test]
async fn remote_events_for_one_connection_are_applied_in_order() {
    let mut harness = setup_with_healing(false).await;
    let cc = harness.establish_remote().await;
    async_assert_eventually!(
        harness.remote_monitor.is_monitoring("nsm-2").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    let destination = cc.destination().unwrap().clone();
    let mut updated = destination.clone();
    updated.state = ConnectionState::Down;
    harness
        .remote_monitor
        .publish("nsm-2", MonitorEvent::new(EventType::Update, Some(updated)))
        .await;
    harness
        .remote_monitor
        .publish("nsm-2", MonitorEvent::new(EventType::Delete, Some(destination)))
        .await;

    assert_eq!(harness.next_heal_trigger().await, HealTrigger::DstUpdate);
    assert_eq!(harness.next_heal_trigger().await, HealTrigger::DstDown);
}

#[tokio::test]
async fn local_endpoints_are_monitored_while_registered() {
    let harness = setup().await;
    async_assert_eventually!(
        harness.endpoint_monitor.is_monitoring("nse-a").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    factories::add_local_endpoint(&harness.model, "nse-b", "icmp");
    async_assert_eventually!(
        harness.endpoint_monitor.is_monitoring("nse-b").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    harness.model.delete_endpoint("nse-a");
    async_assert_eventually!(
        harness.endpoint_monitor.is_monitoring("nse-a").await,
        expect = false,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );
    assert!(harness.endpoint_monitor.is_monitoring("nse-b").await);
    assert_eq!(harness.endpoint_monitor.count_calls_containing("monitor:nse-a").await, 1);
}

#[tokio::test]
async fn local_endpoint_update_and_delete_request_heals() {
    let mut harness = setup_with_healing(false).await;
    let cc = harness.establish().await;
    async_assert_eventually!(
        harness.endpoint_monitor.is_monitoring("nse-a").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    let destination = cc.destination().unwrap().clone();
    let mut updated = destination.clone();
    updated.state = ConnectionState::Down;
    harness
        .endpoint_monitor
        .publish("nse-a", MonitorEvent::new(EventType::Update, Some(updated)))
        .await;
    assert_eq!(harness.next_heal_trigger().await, HealTrigger::DstUpdate);
    assert!(harness
        .model
        .get_client_connection(cc.id())
        .unwrap()
        .destination()
        .unwrap()
        .state
        .is_down());

    harness
        .endpoint_monitor
        .publish("nse-a", MonitorEvent::new(EventType::Delete, Some(destination)))
        .await;
    assert_eq!(harness.next_heal_trigger().await, HealTrigger::DstDown);
}

#[tokio::test]
async fn local_endpoint_events_for_unknown_connections_are_ignored() {
    let mut harness = setup_with_healing(false).await;
    async_assert_eventually!(
        harness.endpoint_monitor.is_monitoring("nse-a").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    harness
        .endpoint_monitor
        .publish(
            "nse-a",
            MonitorEvent::new(EventType::Delete, Some(Connection::local("unknown", "icmp"))),
        )
        .await;
    time::sleep(Duration::from_millis(50)).await;
    assert!(harness.heal_queue.as_mut().unwrap().try_recv().is_err());
}

#[tokio::test]
async fn broken_endpoint_stream_deletes_the_endpoint() {
    let harness = setup().await;
    async_assert_eventually!(
        harness.endpoint_monitor.is_monitoring("nse-a").await,
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(10)
    );

    harness.endpoint_monitor.break_stream("nse-a").await;

    async_assert_eventually!(
        harness.model.get_endpoint("nse-a").is_none(),
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(25)
    );
    async_assert_eventually!(
        harness.discovery.count_calls_containing("remove:nse-a").await,
        expect = 1,
        max_attempts = 20,
        interval = Duration::from_millis(25)
    );
}

#[tokio::test]
async fn unreachable_endpoint_is_deleted() {
    let harness = setup().await;
    harness.endpoint_monitor.set_unreachable("nse-u").await;
    let endpoint = factories::add_local_endpoint(&harness.model, "nse-u", "icmp");
    harness.discovery.add_registration(endpoint.registration).await;

    async_assert_eventually!(
        harness.model.get_endpoint("nse-u").is_none(),
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(25)
    );
    assert!(harness.model.get_endpoint("nse-a").is_some());
}
