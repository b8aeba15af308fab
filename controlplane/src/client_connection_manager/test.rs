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

use nsm_shutdown::Shutdown;
use nsm_test_utils::{async_assert_eventually, unpack_enum};
use tokio::{sync::mpsc, task, time};

use super::*;
use crate::{
    clients::{NoopPlugin, StaticPrefixPool},
    connection::{ConnectionContext, ConnectionState, Mechanism, MechanismType},
    heal::HealProcessor,
    mechanism::{MechanismSelector, SequentialVniAllocator},
    nse_manager::RoundRobinSelector,
    pipeline::PipelineDependencies,
    test_utils::{
        factories,
        mocks::{DiscoveryMock, ForwarderMock, NseConnectorMock},
    },
};

struct Harness {
    ccm: ClientConnectionManager,
    pipeline: RequestPipeline,
    model: Model,
    discovery: DiscoveryMock,
    forwarder: ForwarderMock,
    _shutdown: Shutdown,
}

async fn setup_with_config(config: NsmConfig) -> Harness {
    let _ = env_logger::try_init();
    let config = Arc::new(config);
    let model = Model::new(factories::nsm("nsm-1"));
    let discovery = DiscoveryMock::new();
    let nse = NseConnectorMock::new();
    let forwarder = ForwarderMock::new();
    let vni_allocator = Arc::new(SequentialVniAllocator::new());
    let nse_manager = NseManager::new(
        model.clone(),
        Arc::new(discovery.clone()),
        Arc::new(nse),
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
    let (request_tx, request_rx) = mpsc::channel(10);
    HealProcessor {
        config: config.clone(),
        model: model.clone(),
        pipeline: pipeline.clone(),
        nse_manager: nse_manager.clone(),
        request_rx,
        shutdown_signal: shutdown.to_signal(),
    }
    .create()
    .spawn();

    let ccm = ClientConnectionManager::new(
        model.clone(),
        pipeline.clone(),
        HealRequester::new(request_tx),
        nse_manager,
        Arc::new(discovery.clone()),
        vni_allocator,
        config,
    );

    factories::add_forwarder(&model, "fwd-1");
    let endpoint = factories::add_local_endpoint(&model, "nse-a", "icmp");
    discovery.add_registration(endpoint.registration).await;

    Harness {
        ccm,
        pipeline,
        model,
        discovery,
        forwarder,
        _shutdown: shutdown,
    }
}

async fn setup() -> Harness {
    setup_with_config(factories::test_config()).await
}

impl Harness {
    async fn establish(&self) -> ClientConnection {
        let conn = self.pipeline.request(factories::local_request("icmp")).await.unwrap();
        self.model.get_client_connection(&conn.id).unwrap()
    }

    fn state_of(&self, id: &str) -> Option<ClientConnectionState> {
        self.model.get_client_connection(id).map(|cc| cc.state())
    }

    /// Add a Ready connection requested by `source_manager` whose destination is a local endpoint.
    fn add_remote_source_connection(&self, id: &str, source_manager: &str) -> ClientConnection {
        let source = Connection::remote(id, "icmp", source_manager, "nsm-1");
        let mut cc = ClientConnection::new(id);
        cc.xcon = Some(CrossConnect::new(id, "IP", source.clone()).with_destination(Connection::local("d", "icmp")));
        cc.request = Some(NetworkServiceRequest::new(source, Vec::new()));
        self.model
            .add_client_connection(cc, ClientConnectionState::Ready)
            .unwrap()
            .connection
    }

    /// Add a connection in `state` whose destination `dst_id` lives on `remote_name`.
    fn add_remote_destination_connection(
        &self,
        id: &str,
        dst_id: &str,
        remote_name: &str,
        state: ClientConnectionState,
    ) -> ClientConnection
    {
        let mut cc = ClientConnection::new(id);
        cc.xcon = Some(
            CrossConnect::new(id, "IP", Connection::local(id, "icmp"))
                .with_destination(Connection::remote(dst_id, "icmp", "nsm-1", remote_name)),
        );
        cc.remote_nsm = Some(factories::nsm(remote_name));
        cc.forwarder_registered_name = "fwd-1".to_string();
        self.model.add_client_connection(cc, state).unwrap().connection
    }
}

fn restored_local_xcon(id: &str, endpoint: &str) -> CrossConnect {
    let mut source = Connection::local(id, "icmp");
    source.mechanism = Some(factories::kernel_mechanism());
    source.context = Some(ConnectionContext::default());
    let mut destination = Connection::local("7", "icmp");
    destination.mechanism = Some(
        Mechanism::new(MechanismType::KernelInterface).with_parameter(params::WORKSPACE_NSE_NAME, endpoint),
    );
    CrossConnect::new(id, "IP", source).with_destination(destination)
}

#[tokio::test]
async fn source_down_on_xcon_update_closes_the_connection() {
    let harness = setup().await;
    let cc = harness.establish().await;

    let mut xcon = cc.xcon.clone().unwrap();
    xcon.source.state = ConnectionState::Down;
    harness.ccm.update_xcon(&cc, xcon).await;

    assert!(harness.model.get_client_connection(cc.id()).is_none());
    assert!(harness.forwarder.programmed("fwd-1").await.is_empty());
}

#[tokio::test]
async fn destination_down_on_xcon_update_heals_the_connection() {
    let harness = setup().await;
    let cc = harness.establish().await;
    harness.model.delete_endpoint("nse-a");
    harness.discovery.remove_endpoint("nse-a").await;
    let endpoint = factories::add_local_endpoint(&harness.model, "nse-b", "icmp");
    harness.discovery.add_registration(endpoint.registration).await;

    let mut xcon = cc.xcon.clone().unwrap();
    if let Some(dst) = xcon.destination.as_mut() {
        dst.state = ConnectionState::Down;
    }
    harness.ccm.update_xcon(&cc, xcon).await;

    async_assert_eventually!(
        harness.model.get_client_connection(cc.id()).and_then(|c| c.endpoint_name().map(String::from)),
        expect = Some("nse-b".to_string()),
        max_attempts = 20,
        interval = Duration::from_millis(50)
    );
}

#[tokio::test]
async fn forwarder_down_heals_connections_on_that_forwarder() {
    let harness = setup().await;
    let cc = harness.establish().await;

    let forwarder = harness.model.delete_forwarder("fwd-1").unwrap();
    factories::add_forwarder(&harness.model, "fwd-2");
    harness.ccm.forwarder_down(&forwarder).await;

    async_assert_eventually!(
        harness
            .model
            .get_client_connection(cc.id())
            .map(|c| (c.forwarder_registered_name.clone(), c.state())),
        expect = Some(("fwd-2".to_string(), ClientConnectionState::Ready)),
        max_attempts = 20,
        interval = Duration::from_millis(50)
    );
}

#[tokio::test]
async fn unchanged_local_destination_is_ignored() {
    let harness = setup().await;
    let cc = harness.establish().await;

    let mut destination = cc.destination().unwrap().clone();
    if let Some(mechanism) = destination.mechanism.as_mut() {
        mechanism.parameters.remove(params::WORKSPACE);
        mechanism.parameters.remove(params::WORKSPACE_NSE_NAME);
    }
    harness.ccm.local_destination_updated(&cc, destination).await;

    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.forwarder.count_calls_containing("request:fwd-1").await, 1);
}

#[tokio::test]
async fn changed_local_destination_heals_the_connection() {
    let harness = setup().await;
    let cc = harness.establish().await;

    let mut destination = cc.destination().unwrap().clone();
    destination.labels.insert("app".to_string(), "firewall".to_string());
    harness.ccm.local_destination_updated(&cc, destination).await;

    async_assert_eventually!(
        harness.forwarder.count_calls_containing("request:fwd-1").await,
        expect = 2,
        max_attempts = 20,
        interval = Duration::from_millis(50)
    );
    assert_eq!(harness.state_of(cc.id()), Some(ClientConnectionState::Ready));
}

#[tokio::test]
async fn remote_destination_reported_up_is_ignored() {
    let harness = setup().await;
    let cc = harness.add_remote_destination_connection("5", "d1", "nsm-2", ClientConnectionState::Ready);

    let mut destination = cc.destination().unwrap().clone();
    destination.labels.insert("app".to_string(), "firewall".to_string());
    harness.ccm.remote_destination_updated(&cc, destination).await;

    let stored = harness.model.get_client_connection("5").unwrap();
    assert!(stored.destination().unwrap().labels.is_empty());
}

#[tokio::test]
async fn deleted_connections_are_found_until_they_expire() {
    let mut config = factories::test_config();
    config.deleted_connection_lifetime = Duration::from_millis(100);
    let harness = setup_with_config(config).await;
    let cc = harness.establish().await;
    let xcon = cc.xcon.clone().unwrap();

    let deleted = harness.model.delete_client_connection(cc.id()).unwrap();
    harness.ccm.mark_connection_deleted(deleted);
    assert!(harness.ccm.is_connection_deleted(cc.id()));
    assert_eq!(
        harness.ccm.get_client_connection_by_xcon(&xcon).map(|c| c.id().to_string()),
        Some(cc.id().to_string())
    );
    assert!(harness
        .ccm
        .get_client_connection_by_local_dst(&cc.destination().unwrap().id)
        .is_some());

    time::sleep(Duration::from_millis(150)).await;
    assert!(!harness.ccm.is_connection_deleted(cc.id()));
    harness.ccm.cleanup_deleted_connections();
    assert!(harness.ccm.get_client_connection_by_xcon(&xcon).is_none());
}

#[tokio::test]
async fn lookups_by_remote_manager() {
    let harness = setup().await;
    harness.add_remote_source_connection("1", "nsm-3");
    harness.add_remote_destination_connection("2", "d1", "nsm-2", ClientConnectionState::Ready);
    harness.add_remote_destination_connection("3", "d2", "nsm-4", ClientConnectionState::Ready);

    let by_source = harness.ccm.get_client_connections_by_source("nsm-3");
    assert_eq!(by_source.len(), 1);
    assert_eq!(by_source[0].id(), "1");

    let by_remote = harness.ccm.get_client_connections_by_remote("nsm-2");
    assert_eq!(by_remote.len(), 1);
    assert_eq!(by_remote[0].id(), "2");

    assert_eq!(
        harness
            .ccm
            .get_client_connection_by_remote_dst("d2", "nsm-4")
            .map(|c| c.id().to_string()),
        Some("3".to_string())
    );
    assert!(harness.ccm.get_client_connection_by_remote_dst("d2", "nsm-2").is_none());
    assert_eq!(harness.ccm.get_client_connections_by_forwarder("fwd-1").len(), 2);
}

#[tokio::test]
async fn wait_pending_connections_without_pending_fails() {
    let harness = setup().await;
    let err = harness.ccm.wait_pending_connections("d1", "nsm-2").await.unwrap_err();
    unpack_enum!(ClientConnectionManagerError::ConnectionNotFound { id, remote } = err);
    assert_eq!(id, "d1");
    assert_eq!(remote, "nsm-2");
}

#[tokio::test]
async fn wait_pending_connections_finds_a_settled_connection() {
    let harness = setup().await;
    harness
        .model
        .add_client_connection(ClientConnection::new("9"), ClientConnectionState::Requesting)
        .unwrap();

    let model = harness.model.clone();
    task::spawn(async move {
        time::sleep(Duration::from_millis(50)).await;
        model.apply_client_connection_changes("9", |cc| {
            cc.xcon = Some(
                CrossConnect::new("9", "IP", Connection::local("9", "icmp"))
                    .with_destination(Connection::remote("d1", "icmp", "nsm-1", "nsm-2")),
            );
        });
        model
            .change_client_connection_state("9", ClientConnectionState::Ready)
            .unwrap();
    });

    let found = harness.ccm.wait_pending_connections("d1", "nsm-2").await.unwrap();
    assert_eq!(found.map(|cc| cc.id().to_string()), Some("9".to_string()));
    assert_eq!(harness.model.listener_count(), 0);
}

#[tokio::test]
async fn wait_pending_connections_times_out() {
    let harness = setup().await;
    harness
        .model
        .add_client_connection(ClientConnection::new("9"), ClientConnectionState::Healing)
        .unwrap();

    let err = harness.ccm.wait_pending_connections("d1", "nsm-2").await.unwrap_err();
    unpack_enum!(ClientConnectionManagerError::PendingTimeout { id, remote } = err);
    assert_eq!(id, "d1");
    assert_eq!(remote, "nsm-2");
    assert_eq!(harness.model.listener_count(), 0);
}

#[tokio::test]
async fn lost_remote_source_closes_the_connection_after_heal_timeout() {
    let mut config = factories::test_config();
    config.heal_timeout = Duration::from_millis(100);
    let harness = setup_with_config(config).await;
    harness.add_remote_source_connection("1", "nsm-3");

    harness.ccm.update_remote_monitor_done("nsm-3");
    assert_eq!(harness.state_of("1"), Some(ClientConnectionState::Healing));

    async_assert_eventually!(
        harness.state_of("1"),
        expect = None::<ClientConnectionState>,
        max_attempts = 20,
        interval = Duration::from_millis(25)
    );
}

#[tokio::test]
async fn re_requested_remote_source_is_kept() {
    let mut config = factories::test_config();
    config.heal_timeout = Duration::from_millis(100);
    let harness = setup_with_config(config).await;
    let cc = harness.add_remote_source_connection("1", "nsm-3");

    harness.ccm.remote_connection_lost(&cc);
    harness
        .model
        .compare_and_change_state("1", ClientConnectionState::Healing, ClientConnectionState::Requesting)
        .unwrap();
    harness
        .model
        .compare_and_change_state("1", ClientConnectionState::Requesting, ClientConnectionState::Ready)
        .unwrap();

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.state_of("1"), Some(ClientConnectionState::Ready));
}

#[tokio::test]
async fn restore_connections_heals_restored_local_connection() {
    let harness = setup().await;
    assert!(!harness.ccm.wait_state_restored(Duration::from_millis(10)).await);

    harness
        .ccm
        .restore_connections(vec![restored_local_xcon("41", "nse-a")], "fwd-1")
        .await;
    assert!(harness.ccm.wait_state_restored(Duration::from_millis(10)).await);

    let restored = harness.model.get_client_connection("41").unwrap();
    assert_eq!(restored.endpoint_name(), Some("nse-a"));
    assert_eq!(restored.forwarder_registered_name, "fwd-1");
    assert!(restored.forwarder_state.is_ready());
    assert!(u64::from_str_radix(&harness.model.connection_id(), 16).unwrap() > 0x41);

    async_assert_eventually!(
        harness.forwarder.programmed("fwd-1").await.contains_key("41"),
        expect = true,
        max_attempts = 20,
        interval = Duration::from_millis(50)
    );
    async_assert_eventually!(
        harness.state_of("41"),
        expect = Some(ClientConnectionState::Ready),
        max_attempts = 20,
        interval = Duration::from_millis(50)
    );
}

#[tokio::test]
async fn restore_connections_closes_connection_without_endpoint() {
    let harness = setup().await;
    harness
        .ccm
        .restore_connections(vec![restored_local_xcon("41", "nse-gone")], "fwd-1")
        .await;
    assert!(harness.model.get_client_connection("41").is_none());
}

#[tokio::test]
async fn restore_connections_closes_connection_with_source_down() {
    let harness = setup().await;
    let mut xcon = restored_local_xcon("41", "nse-a");
    xcon.source.state = ConnectionState::Down;
    harness.ccm.restore_connections(vec![xcon], "fwd-1").await;
    assert!(harness.model.get_client_connection("41").is_none());
}

#[tokio::test]
async fn restore_connections_skips_known_connections() {
    let harness = setup().await;
    let cc = harness.establish().await;
    let xcon = cc.xcon.clone().unwrap();

    harness.ccm.restore_connections(vec![xcon], "fwd-1").await;
    assert_eq!(harness.model.get_all_client_connections().len(), 1);
    assert_eq!(harness.state_of(cc.id()), Some(ClientConnectionState::Ready));
}

#[tokio::test]
async fn deleting_broken_endpoint_cleans_registries_and_heals() {
    let harness = setup().await;
    let cc = harness.establish().await;

    let dir = tempfile::tempdir().unwrap();
    let registry_file = Arc::new(NseRegistryFile::new(dir.path().join("registry")));
    let registration = harness.model.get_endpoint("nse-a").unwrap().registration;
    registry_file.append_nse_registration("ws-nse-a", &registration).unwrap();
    let ccm = harness.ccm.clone().with_registry_file(registry_file.clone());

    ccm.delete_endpoint_with_broken_connection("nse-a").await.unwrap();

    assert!(harness.model.get_endpoint("nse-a").is_none());
    assert!(registry_file.load_registry().unwrap().nses.is_empty());
    assert_eq!(harness.discovery.count_calls_containing("remove:nse-a").await, 1);
    async_assert_eventually!(
        harness.state_of(cc.id()),
        expect = None::<ClientConnectionState>,
        max_attempts = 20,
        interval = Duration::from_millis(50)
    );
}
