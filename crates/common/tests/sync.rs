//! Integration tests for relay nodes serving sync requests

mod common;

use std::time::Duration;

use ::common::codec::WriteOptions;
use ::common::config::{IridiumConfig, SyncConfig, SyncNodeConfig};
use ::common::dag::DagProvider;
use ::common::events::Event;
use ::common::iridium::Iridium;
use ::common::p2p::PeerKind;
use ::common::sync::{sync_topic, SyncMessage, SyncReply, SYNC_REPLY_TYPE};
use ::common::testkit::TestNetwork;
use serde_json::json;
use tokio::sync::broadcast::Receiver;

/// Wait for the relay's answer to `request`
async fn reply_for(events: &mut Receiver<Event>, request: &str) -> SyncReply {
    loop {
        let message = common::next_message(events, SYNC_REPLY_TYPE)
            .await
            .expect("sync reply delivered");
        let document = message.payload.payload.into_document().expect("document reply");
        let reply: SyncReply = serde_json::from_value(document).expect("well formed reply");
        if reply.request.as_deref() == Some(request) {
            return reply;
        }
    }
}

async fn put(
    node: &Iridium,
    relay: &Iridium,
    payload: serde_json::Value,
    to: Option<&Iridium>,
    request: &str,
) -> anyhow::Result<()> {
    let message = SyncMessage::put(payload, to.map(Iridium::did))?.with_request(request);
    node.publish(&sync_topic(&relay.did()), serde_json::to_value(message)?, None)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_node_connection_registers_with_relay() -> anyhow::Result<()> {
    common::init_tracing();
    let mut net = TestNetwork::new();
    let relay = net.add_relay("relay").await?;
    let a = net.add_node("user a").await?;
    let mut events = a.events();

    net.connect("user a", "relay", PeerKind::Node).await?;

    let agent = relay.sync_agent().expect("relay runs an agent").clone();
    let a_did = a.did();
    net.eventually(Duration::from_secs(5), || {
        let agent = agent.clone();
        async move { Ok(agent.peer(&a_did).is_some()) }
    })
    .await?;
    assert_eq!(agent.peer(&a_did).map(|peer| peer.did), Some(a_did));

    // the init is acknowledged on the private channel
    let message = common::next_message(&mut events, SYNC_REPLY_TYPE)
        .await
        .expect("init acknowledged");
    assert_eq!(message.topic, a.channels().channel(&relay.did()));
    assert_eq!(message.payload.signer, Some(relay.did()));

    net.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_configured_sync_nodes_are_dialed_on_start() -> anyhow::Result<()> {
    let mut net = TestNetwork::new();
    let relay = net.add_relay("relay").await?;

    let config = IridiumConfig {
        sync_nodes: vec![SyncNodeConfig {
            label: "relay".into(),
            did: relay.did(),
        }],
        ..IridiumConfig::default()
    };
    let a = net.add_node_with("user a", config).await?;

    let agent = relay.sync_agent().expect("relay runs an agent").clone();
    let a_did = a.did();
    net.eventually(Duration::from_secs(5), || {
        let agent = agent.clone();
        let relay = relay.clone();
        async move { Ok(agent.peer(&a_did).is_some() && relay.channels().channel(&a_did).is_some()) }
    })
    .await?;

    net.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_relay_holds_payload_for_recipient() -> anyhow::Result<()> {
    let mut net = TestNetwork::new();
    let relay = net.add_relay("relay").await?;
    let a = net.add_node("user a").await?;
    let b = net.add_node("user b").await?;
    let mallory = net.add_node("mallory").await?;
    let mut events = a.events();
    net.connect("user a", "relay", PeerKind::Node).await?;

    let body = json!({"type": "letter", "text": "see you soon"});
    put(&a, &relay, body.clone(), Some(&b), "1").await?;

    let reply = reply_for(&mut events, "1").await;
    assert!(reply.success, "put failed: {:?}", reply.error);
    let cid = reply.cid.expect("stored link");

    assert_eq!(b.load(&cid, None).await?, body);
    assert_eq!(a.load(&cid, None).await?, body);
    assert!(mallory.load(&cid, None).await.is_err());

    let agent = relay.sync_agent().expect("relay runs an agent");
    assert_eq!(agent.queued(&a.did()), vec![cid]);
    assert_eq!(agent.drain(&a.did()).await, vec![cid]);
    assert!(agent.queued(&a.did()).is_empty());

    net.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_relay_ignores_unsigned_requests() -> anyhow::Result<()> {
    let mut net = TestNetwork::new();
    let relay = net.add_relay("relay").await?;
    let a = net.add_node("user a").await?;
    let mut events = a.events();
    net.connect("user a", "relay", PeerKind::Node).await?;

    let unsigned = SyncMessage::put(json!({"n": 1}), None)?.with_request("unsigned");
    a.publish(
        &sync_topic(&relay.did()),
        serde_json::to_value(unsigned)?,
        Some(WriteOptions::plain()),
    )
    .await?;

    // requests are served in order, so once this one is answered the
    // unsigned one has been seen
    put(&a, &relay, json!({"n": 2}), None, "signed").await?;
    let reply = reply_for(&mut events, "signed").await;
    assert!(reply.success);

    let agent = relay.sync_agent().expect("relay runs an agent");
    assert_eq!(agent.queued(&a.did()), vec![reply.cid.expect("stored link")]);

    net.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_relay_rejects_puts_over_queue_limit() -> anyhow::Result<()> {
    let config = IridiumConfig {
        sync: SyncConfig {
            queue_limit: 1,
            pin_limit: 10,
        },
        ..IridiumConfig::default()
    };
    let mut net = TestNetwork::with_config(config);
    let relay = net.add_relay("relay").await?;
    let a = net.add_node("user a").await?;
    let mut events = a.events();
    net.connect("user a", "relay", PeerKind::Node).await?;

    put(&a, &relay, json!({"n": 1}), None, "first").await?;
    let first = reply_for(&mut events, "first").await;
    assert!(first.success);

    put(&a, &relay, json!({"n": 2}), None, "second").await?;
    let second = reply_for(&mut events, "second").await;
    assert!(!second.success);
    assert!(second.cid.is_none());
    assert!(second.error.unwrap_or_default().contains("full"));

    let agent = relay.sync_agent().expect("relay runs an agent");
    assert_eq!(agent.queued(&a.did()).len(), 1);

    net.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_relay_pins_for_peer() -> anyhow::Result<()> {
    let mut net = TestNetwork::new();
    let relay = net.add_relay("relay").await?;
    let a = net.add_node("user a").await?;
    let mut events = a.events();
    net.connect("user a", "relay", PeerKind::Node).await?;

    let link = a.store(json!({"keep": "me"}), None).await?;
    let message = SyncMessage::pin(link)?.with_request("pin");
    a.publish(&sync_topic(&relay.did()), serde_json::to_value(message)?, None)
        .await?;

    let reply = reply_for(&mut events, "pin").await;
    assert!(reply.success);
    assert_eq!(reply.cid, Some(link));
    assert_eq!(net.dag().pin_count(&link).await?, 2);

    let agent = relay.sync_agent().expect("relay runs an agent");
    assert_eq!(agent.pinned(&a.did()), vec![link]);

    net.shutdown().await?;
    Ok(())
}
