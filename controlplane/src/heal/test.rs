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
use tokio::{sync::mpsc, task, time};

use super::*;
use crate::{
    clients::{NoopPlugin, StaticPrefixPool},
    config::NsmConfig,
    mechanism::{MechanismSelector, SequentialVniAllocator},
    model::{ClientConnection, ClientConnectionState, Model},
    nse_manager::{NseManager, RoundRobinSelector},
    pipeline::{PipelineDependencies, RequestPipeline},
    test_utils::{
        factories,
        mocks::{DiscoveryMock, ForwarderMock, NseConnectorMock},
    },
};

struct Harness {
    requester: HealRequester,
    pipeline: RequestPipeline,
    model: Model,
    discovery: DiscoveryMock,
    nse: NseConnectorMock,
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
    let nse_manager = NseManager::new(
        model.clone(),
        Arc::new(discovery.clone()),
        Arc::new(nse.clone()),
        Arc::new(RoundRobinSelector::new()),
        config.clone(),
    );
    let pipeline = RequestPipeline::build(PipelineDependencies {
        model: model.clone(),
        nse_manager: nse_manager.clone(),
        forwarder_client: Arc::new(forwarder.clone()),
        mechanism_selector: MechanismSelector::new(Arc::new(SequentialVniAllocator::new())),
        prefix_pool: Arc::new(StaticPrefixPool::new(Vec::<String>::new())),
        plugin: Arc::new(NoopPlugin),
        config: config.clone(),
    });

    let shutdown = Shutdown::new();
    let (request_tx, request_rx) = mpsc::channel(10);
    HealProcessor {
        config,
        model: model.clone(),
        pipeline: pipeline.clone(),
        nse_manager,
        request_rx,
        shutdown_signal: shutdown.to_signal(),
    }
    .create()
    .spawn();

    factories::add_forwarder(&model, "fwd-1");
    let endpoint = factories::add_local_endpoint(&model, "nse-a", "icmp");
    discovery.add_registration(endpoint.registration).await;

    Harness {
        requester: HealRequester::new(request_tx),
        pipeline,
        model,
        discovery,
        nse,
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

    async fn drop_endpoint(&self, name: &str) {
        self.model.delete_endpoint(name);
        self.discovery.remove_endpoint(name).await;
    }
}

#[tokio::test]
async fn dst_down_moves_to_another_endpoint() {
    let harness = setup().await;
    let cc = harness.establish().await;
    let old_dst_id = cc.destination().unwrap().id.clone();

    harness.drop_endpoint("nse-a").await;
    let endpoint = factories::add_local_endpoint(&harness.model, "nse-b", "icmp");
    harness.discovery.add_registration(endpoint.registration).await;

    let outcome = harness.requester.heal_and_wait(cc.clone(), HealTrigger::DstDown).await.unwrap();
    assert!(outcome.is_healed());

    let healed = harness.model.get_client_connection(cc.id()).unwrap();
    assert_eq!(healed.state(), ClientConnectionState::Ready);
    assert_eq!(healed.endpoint_name(), Some("nse-b"));
    assert_ne!(healed.destination().unwrap().id, old_dst_id);
    assert_eq!(harness.nse.active_connections("nse-b").await.len(), 1);
    assert_eq!(harness.forwarder.programmed("fwd-1").await.len(), 1);
}

#[tokio::test]
async fn dst_down_without_replacement_closes_the_connection() {
    let harness = setup().await;
    let cc = harness.establish().await;
    harness.drop_endpoint("nse-a").await;

    let outcome = harness.requester.heal_and_wait(cc.clone(), HealTrigger::DstDown).await.unwrap();
    assert!(outcome.is_closed());
    assert!(harness.model.get_client_connection(cc.id()).is_none());
    assert!(harness.forwarder.programmed("fwd-1").await.is_empty());
}

#[tokio::test]
async fn forwarder_down_reprograms_a_new_forwarder() {
    let harness = setup().await;
    let cc = harness.establish().await;
    harness.nse.take_calls().await;

    harness.model.delete_forwarder("fwd-1");
    let heal = {
        let requester = harness.requester.clone();
        let cc = cc.clone();
        task::spawn(async move { requester.heal_and_wait(cc, HealTrigger::ForwarderDown).await })
    };
    time::sleep(Duration::from_millis(50)).await;
    factories::add_forwarder(&harness.model, "fwd-2");

    let outcome = heal.await.unwrap().unwrap();
    assert!(outcome.is_healed());
    let healed = harness.model.get_client_connection(cc.id()).unwrap();
    assert_eq!(healed.state(), ClientConnectionState::Ready);
    assert_eq!(healed.forwarder_registered_name, "fwd-2");
    assert!(healed.forwarder_state.is_ready());
    assert_eq!(healed.destination().unwrap().id, cc.destination().unwrap().id);
    assert_eq!(harness.forwarder.programmed("fwd-2").await.len(), 1);
    // The endpoint connection is kept as it is
    assert_eq!(harness.nse.count_calls_containing("request:").await, 0);
}

#[tokio::test]
async fn forwarder_down_without_forwarder_closes_the_connection() {
    let harness = setup().await;
    let cc = harness.establish().await;
    harness.model.delete_forwarder("fwd-1");

    let outcome = harness
        .requester
        .heal_and_wait(cc.clone(), HealTrigger::ForwarderDown)
        .await
        .unwrap();
    assert!(outcome.is_closed());
    assert!(harness.model.get_client_connection(cc.id()).is_none());
    assert!(harness.nse.active_connections("nse-a").await.is_empty());
}

#[tokio::test]
async fn dst_update_re_requests_from_the_source() {
    let harness = setup().await;
    let cc = harness.establish().await;

    let outcome = harness.requester.heal_and_wait(cc.clone(), HealTrigger::DstUpdate).await.unwrap();
    assert!(outcome.is_healed());
    assert_eq!(
        harness.model.get_client_connection(cc.id()).unwrap().state(),
        ClientConnectionState::Ready
    );
    assert_eq!(harness.forwarder.count_calls_containing("request:fwd-1").await, 2);
}

#[tokio::test]
async fn dst_update_retries_after_a_failed_attempt() {
    let harness = setup().await;
    let cc = harness.establish().await;
    let dst_id = cc.destination().unwrap().id.clone();
    // Exhausts the three forwarder attempts of the first heal request and fails once more
    harness.forwarder.fail_next_requests(4).await;

    let outcome = harness.requester.heal_and_wait(cc.clone(), HealTrigger::DstUpdate).await.unwrap();
    assert!(outcome.is_healed());
    assert_eq!(
        harness.model.get_client_connection(cc.id()).unwrap().state(),
        ClientConnectionState::Ready
    );
    assert_eq!(harness.forwarder.count_calls_containing("request:fwd-1").await, 6);
    assert_eq!(harness.nse.count_calls_containing("close:nse-a").await, 1);
    assert_eq!(
        harness
            .nse
            .count_calls_containing(&format!("request:nse-a:{}", dst_id))
            .await,
        1
    );
    assert_eq!(harness.nse.active_connections("nse-a").await.len(), 1);
}

#[tokio::test]
async fn dst_update_closes_after_the_last_retry() {
    let harness = setup().await;
    let cc = harness.establish().await;
    harness.forwarder.fail_next_requests(100).await;

    let outcome = harness.requester.heal_and_wait(cc.clone(), HealTrigger::DstUpdate).await.unwrap();
    assert!(outcome.is_closed());
    assert!(harness.model.get_client_connection(cc.id()).is_none());
    // One establishing request plus two heal attempts of three forwarder requests each
    assert_eq!(harness.forwarder.count_calls_containing("request:fwd-1").await, 7);
}

#[tokio::test]
async fn dst_nmgr_down_waits_for_the_same_endpoint() {
    let harness = setup().await;
    harness.drop_endpoint("nse-a").await;
    harness
        .discovery
        .add_registration(factories::registration("nse-r", "icmp", "nsm-2"))
        .await;
    let cc = harness.establish().await;
    assert_eq!(cc.endpoint_name(), Some("nse-r"));
    let dst_id = cc.destination().unwrap().id.clone();

    harness.nse.set_unreachable("nsm-2").await;
    let nse = harness.nse.clone();
    task::spawn(async move {
        time::sleep(Duration::from_millis(100)).await;
        nse.set_reachable("nsm-2").await;
    });

    let outcome = harness
        .requester
        .heal_and_wait(cc.clone(), HealTrigger::DstNmgrDown)
        .await
        .unwrap();
    assert!(outcome.is_healed());
    let healed = harness.model.get_client_connection(cc.id()).unwrap();
    assert_eq!(healed.endpoint_name(), Some("nse-r"));
    assert_eq!(healed.destination().unwrap().id, dst_id);
    assert_eq!(
        harness
            .nse
            .count_calls_containing(&format!("request:nsm-2:{}", dst_id))
            .await,
        1
    );
}

#[tokio::test]
async fn dst_nmgr_down_moves_to_another_endpoint_when_the_same_one_never_returns() {
    let mut config = factories::test_config();
    config.heal_dst_wait_timeout = Duration::from_millis(400);
    let harness = setup_with_config(config).await;
    harness.drop_endpoint("nse-a").await;
    harness
        .discovery
        .add_registration(factories::registration("nse-r", "icmp", "nsm-2"))
        .await;
    let cc = harness.establish().await;
    assert_eq!(cc.endpoint_name(), Some("nse-r"));
    let dst_id = cc.destination().unwrap().id.clone();

    harness.nse.set_unreachable("nsm-2").await;
    // Appears once the retry against nse-r has already failed
    let model = harness.model.clone();
    let discovery = harness.discovery.clone();
    task::spawn(async move {
        time::sleep(Duration::from_millis(600)).await;
        let endpoint = factories::add_local_endpoint(&model, "nse-b", "icmp");
        discovery.add_registration(endpoint.registration).await;
    });

    let outcome = harness
        .requester
        .heal_and_wait(cc.clone(), HealTrigger::DstNmgrDown)
        .await
        .unwrap();
    assert!(outcome.is_healed());
    let healed = harness.model.get_client_connection(cc.id()).unwrap();
    assert_eq!(healed.state(), ClientConnectionState::Ready);
    assert_eq!(healed.endpoint_name(), Some("nse-b"));
    assert_ne!(healed.destination().unwrap().id, dst_id);
    assert_eq!(harness.nse.active_connections("nse-b").await.len(), 1);
    assert_eq!(harness.forwarder.programmed("fwd-1").await.len(), 1);
}

#[tokio::test]
async fn dst_down_with_stalled_discovery_closes_the_connection() {
    let harness = setup().await;
    let cc = harness.establish().await;
    harness.model.delete_endpoint("nse-a");
    harness.discovery.set_stalled(true).await;

    let outcome = time::timeout(
        Duration::from_secs(5),
        harness.requester.heal_and_wait(cc.clone(), HealTrigger::DstDown),
    )
    .await
    .expect("heal should be bounded by the destination wait")
    .unwrap();
    assert!(outcome.is_closed());
    assert!(harness.model.get_client_connection(cc.id()).is_none());
}

#[tokio::test]
async fn dst_down_on_unreachable_manager_heals_as_nmgr_down() {
    let harness = setup().await;
    harness.drop_endpoint("nse-a").await;
    harness
        .discovery
        .add_registration(factories::registration("nse-r", "icmp", "nsm-2"))
        .await;
    let cc = harness.establish().await;

    harness.nse.set_unreachable("nsm-2").await;
    let outcome = harness.requester.heal_and_wait(cc.clone(), HealTrigger::DstDown).await.unwrap();
    assert!(outcome.is_closed());
    assert!(harness.model.get_client_connection(cc.id()).is_none());
}

#[tokio::test]
async fn heal_disabled_closes_the_connection() {
    let mut config = factories::test_config();
    config.heal_enabled = false;
    let harness = setup_with_config(config).await;
    let cc = harness.establish().await;

    let outcome = harness.requester.heal_and_wait(cc.clone(), HealTrigger::DstDown).await.unwrap();
    assert!(outcome.is_closed());
    assert!(harness.model.get_client_connection(cc.id()).is_none());
    assert!(harness.nse.active_connections("nse-a").await.is_empty());
}

#[tokio::test]
async fn connection_that_is_not_ready_is_skipped() {
    let harness = setup().await;
    harness
        .model
        .add_client_connection(ClientConnection::new("42"), ClientConnectionState::Requesting)
        .unwrap();
    let cc = harness.model.get_client_connection("42").unwrap();

    let outcome = harness.requester.heal_and_wait(cc, HealTrigger::DstDown).await.unwrap();
    assert!(outcome.is_skipped());
    assert_eq!(
        harness.model.get_client_connection("42").unwrap().state(),
        ClientConnectionState::Requesting
    );
}

#[tokio::test]
async fn concurrent_heals_of_one_connection_run_once() {
    let harness = setup().await;
    let cc = harness.establish().await;
    harness.model.delete_forwarder("fwd-1");

    let first = {
        let requester = harness.requester.clone();
        let cc = cc.clone();
        task::spawn(async move { requester.heal_and_wait(cc, HealTrigger::ForwarderDown).await })
    };
    time::sleep(Duration::from_millis(20)).await;
    let second = harness
        .requester
        .heal_and_wait(cc.clone(), HealTrigger::ForwarderDown)
        .await
        .unwrap();
    assert!(second.is_skipped());

    factories::add_forwarder(&harness.model, "fwd-2");
    assert!(first.await.unwrap().unwrap().is_healed());
}

#[tokio::test]
async fn requester_fails_after_shutdown() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let requester = HealRequester::new(tx);
    let err = requester
        .heal_and_wait(ClientConnection::new("1"), HealTrigger::DstDown)
        .await
        .unwrap_err();
    assert_eq!(err, HealError::ActorDisconnected);
}
