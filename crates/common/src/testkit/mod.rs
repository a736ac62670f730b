/// Lightweight harness for multi-node tests
///
/// Builds fully wired [`Iridium`](crate::iridium::Iridium) nodes on top of the
/// in-memory providers, all sharing one network, so tests can exercise
/// channels, namespaces and relays without any external infrastructure.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_direct_message() -> anyhow::Result<()> {
///     let mut net = TestNetwork::new();
///     let alice = net.add_node("alice").await?;
///     let bob = net.add_node("bob").await?;
///
///     net.connect("alice", "bob", PeerKind::Peer).await?;
///     alice.send(&[bob.did()], json!({"type": "hello"}), None).await?;
///
///     net.shutdown().await?;
///     Ok(())
/// }
/// ```
mod network;

pub use network::TestNetwork;
