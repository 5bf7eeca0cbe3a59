mod common;

use std::sync::Arc;

use bedlam_relay::client::{HostInputs, HostOutputs, Participant};
use bedlam_relay::config::{ParticipantConfig, RelayConfig};
use bedlam_relay::domains::envelope::{Envelope, MessageKind};
use bedlam_relay::error::BedlamError;
use bedlam_relay::services::connection::ConnectionState;
use tokio::sync::mpsc::UnboundedReceiver;

use common::{
    assert_quiet, collector, next_delivery, spawn_relay, wait_for_state, MemoryHub, RunningRelay,
};

async fn join(relay: &RunningRelay, user_id: Option<&str>) -> (Participant, UnboundedReceiver<Envelope>) {
    let config = ParticipantConfig {
        endpoint_url: Some(relay.base_url.clone()),
        local_participant_id: user_id.map(str::to_string),
        ..ParticipantConfig::default()
    };
    let (callback, rx) = collector();
    let participant = Participant::new(&config, Some(callback)).unwrap();
    participant.start().await;
    let mut state = participant.watch_state();
    wait_for_state(&mut state, ConnectionState::Connected).await;
    (participant, rx)
}

#[tokio::test]
async fn table_announces_a_new_user() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let (table, mut table_rx) = join(&relay, None).await;
    let (bob, mut bob_rx) = join(&relay, Some("bob")).await;

    assert_eq!(table.local_id().await, "table");
    table.send(MessageKind::AddUser, "alice", None).await.unwrap();

    let received = next_delivery(&mut bob_rx).await;
    assert_eq!(received.kind(), MessageKind::AddUser);
    assert_eq!(received.sender(), "table");
    assert_eq!(received.data_string().as_deref(), Some("alice"));
    assert_eq!(
        bob.outputs(),
        Some(HostOutputs {
            message_received_type: "add-user".to_string(),
            message_received_sender: "table".to_string(),
            message_received_data: Some("alice".to_string()),
        })
    );

    // the relay echoes to everyone, the sender drops its own message
    assert_quiet(&mut table_rx).await;
    assert_eq!(table.outputs(), None);
}

#[tokio::test]
async fn acknowledgement_only_reaches_its_recipient() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let (_table, mut table_rx) = join(&relay, Some("table")).await;
    let (alice, mut alice_rx) = join(&relay, Some("alice")).await;
    let (_carol, mut carol_rx) = join(&relay, Some("carol")).await;

    alice
        .send(MessageKind::AckUser, "alice", Some("table"))
        .await
        .unwrap();

    let received = next_delivery(&mut table_rx).await;
    assert_eq!(received.kind(), MessageKind::AckUser);
    assert_eq!(received.sender(), "alice");
    assert_eq!(received.recipient(), Some("table"));
    assert_eq!(received.data_string().as_deref(), Some("alice"));
    assert_quiet(&mut carol_rx).await;
    assert_quiet(&mut alice_rx).await;
}

#[tokio::test]
async fn card_lists_survive_the_relay() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let (dealer, _dealer_rx) = join(&relay, Some("dealer")).await;
    let (_bob, mut bob_rx) = join(&relay, Some("bob")).await;

    dealer
        .send(MessageKind::ChooseWinner, "3,7,12", None)
        .await
        .unwrap();

    let received = next_delivery(&mut bob_rx).await;
    assert_eq!(received.kind(), MessageKind::ChooseWinner);
    assert_eq!(received.event().card_ids(), Some(&[3, 7, 12][..]));
    assert_eq!(received.data_string().as_deref(), Some("3,7,12"));
}

#[tokio::test]
async fn strict_relay_delivers_well_formed_envelopes() {
    let relay = spawn_relay(RelayConfig {
        strict_validation: true,
        ..RelayConfig::default()
    })
    .await;
    let (alice, _alice_rx) = join(&relay, Some("alice")).await;
    let (_bob, mut bob_rx) = join(&relay, Some("bob")).await;

    alice.send(MessageKind::PlayedCard, "4", None).await.unwrap();
    let received = next_delivery(&mut bob_rx).await;
    assert_eq!(received.event().card_ids(), Some(&[4][..]));
}

#[tokio::test]
async fn host_update_sends_on_trigger() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let (_bob, mut bob_rx) = join(&relay, Some("bob")).await;

    let host = Participant::new(&ParticipantConfig::default(), None).unwrap();
    let mut inputs = HostInputs {
        endpoint_url: Some(relay.base_url.clone()),
        user_id: Some("alice".to_string()),
        message_type: Some("game-stage".to_string()),
        message_data: Some("voting".to_string()),
        recipient: None,
        send_message: false,
    };

    // no trigger, nothing goes out
    assert_eq!(host.update_view(inputs.clone()).await.unwrap(), None);
    assert_eq!(host.local_id().await, "alice");
    let mut state = host.watch_state();
    wait_for_state(&mut state, ConnectionState::Connected).await;
    assert_quiet(&mut bob_rx).await;

    inputs.send_message = true;
    let message_id = host.update_view(inputs.clone()).await.unwrap().unwrap();
    let received = next_delivery(&mut bob_rx).await;
    assert_eq!(received.message_id(), message_id);
    assert_eq!(received.sender(), "alice");
    assert_eq!(received.data_string().as_deref(), Some("voting"));

    // empty data is not a send
    inputs.message_data = Some(String::new());
    assert_eq!(host.update_view(inputs).await.unwrap(), None);
    assert_quiet(&mut bob_rx).await;
    host.stop().await;
}

#[tokio::test]
async fn send_without_endpoint_is_a_config_error() {
    let participant = Participant::new(&ParticipantConfig::default(), None).unwrap();
    let err = participant
        .send(MessageKind::AddUser, "alice", None)
        .await
        .unwrap_err();
    assert!(matches!(err, BedlamError::Config(_)));
}

#[tokio::test]
async fn unknown_type_from_host_is_rejected() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let (host, _rx) = join(&relay, Some("alice")).await;
    let err = host
        .update_view(HostInputs {
            message_type: Some("shuffle-deck".to_string()),
            message_data: Some("1".to_string()),
            user_id: Some("alice".to_string()),
            send_message: true,
            ..HostInputs::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BedlamError::Validation(_)));
}

#[tokio::test]
async fn unreachable_relay_leaves_participant_disconnected() {
    let config = ParticipantConfig {
        endpoint_url: Some("http://127.0.0.1:1".to_string()),
        auto_reconnect: true,
        ..ParticipantConfig::default()
    };
    let participant = Participant::new(&config, None).unwrap();
    participant.start().await;
    let mut state = participant.watch_state();
    wait_for_state(&mut state, ConnectionState::Disconnected).await;
    assert_eq!(participant.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn one_shot_send_opens_no_hub_connection() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let (_bob, mut bob_rx) = join(&relay, Some("bob")).await;

    let hub = MemoryHub::new();
    let config = ParticipantConfig {
        local_participant_id: Some("alice".to_string()),
        ..ParticipantConfig::default()
    };
    let sender = Participant::with_transport(&config, Arc::new(hub.clone()), None).unwrap();
    let message_id = sender
        .send_to(&relay.base_url, MessageKind::SetDealer, "carol", None)
        .await
        .unwrap();

    let received = next_delivery(&mut bob_rx).await;
    assert_eq!(received.message_id(), message_id);
    assert_eq!(received.sender(), "alice");
    assert_eq!(hub.attempts(), 0);
    assert_eq!(sender.state(), ConnectionState::Disconnected);
}
