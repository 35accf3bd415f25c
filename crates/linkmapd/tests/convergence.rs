//! End-to-end gossip tests over real TCP sockets

use futures::SinkExt;
use linkmap_core::{Edge, NodeId};
use linkmap_net::{FrameCodec, Hello};
use linkmapd::{Config, Daemon};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::FramedWrite;

fn test_config(node_id: &str) -> Config {
    Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        node_id: Some(node_id.to_string()),
        peers: vec![],
        dump_graph: false,
        verbose: false,
    }
}

async fn start(node_id: &str) -> Arc<Daemon> {
    let daemon = Daemon::bind(&test_config(node_id)).await.unwrap();
    tokio::spawn(daemon.clone().run());
    daemon
}

/// Poll until the daemon's edge set matches, or fail after 5 seconds.
async fn wait_for_edges(daemon: &Daemon, want: &[(&str, &str)]) {
    let mut want: Vec<Edge> = want
        .iter()
        .map(|(x, y)| Edge::new(NodeId::from(*x), NodeId::from(*y)))
        .collect();
    want.sort();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let got = daemon.edges();
        if got == want {
            return;
        }
        if Instant::now() >= deadline {
            panic!(
                "node {} never converged: got {got:?}, want {want:?}",
                daemon.node_id()
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_two_nodes_learn_their_edge() {
    let a = start("a").await;
    let b = start("b").await;

    b.connect(a.local_addr()).await.unwrap();

    wait_for_edges(&a, &[("a", "b")]).await;
    wait_for_edges(&b, &[("a", "b")]).await;
    assert_eq!(a.peers(), vec![NodeId::from("b")]);
    assert_eq!(b.peers(), vec![NodeId::from("a")]);
}

#[tokio::test]
async fn test_third_node_learns_transitively() {
    let a = start("a").await;
    let b = start("b").await;
    let c = start("c").await;

    b.connect(a.local_addr()).await.unwrap();
    wait_for_edges(&b, &[("a", "b")]).await;

    // c only ever talks to a, yet learns of b through gossip.
    c.connect(a.local_addr()).await.unwrap();
    wait_for_edges(&c, &[("a", "b"), ("a", "c")]).await;
    wait_for_edges(&b, &[("a", "b"), ("a", "c")]).await;
}

#[tokio::test]
async fn test_shutdown_propagates_edge_removal() {
    let a = start("a").await;
    let b = start("b").await;
    let c = start("c").await;

    b.connect(a.local_addr()).await.unwrap();
    c.connect(a.local_addr()).await.unwrap();
    wait_for_edges(&b, &[("a", "b"), ("a", "c")]).await;

    // Killing c severs the a-c link; a notices and gossips the removal
    // to b, which never talked to c directly.
    c.shutdown();
    wait_for_edges(&a, &[("a", "b")]).await;
    wait_for_edges(&b, &[("a", "b")]).await;
}

#[tokio::test]
async fn test_mutual_dial_keeps_single_connection() {
    let a = start("a").await;
    let b = start("b").await;

    b.connect(a.local_addr()).await.unwrap();
    wait_for_edges(&a, &[("a", "b")]).await;
    wait_for_edges(&b, &[("a", "b")]).await;

    // Crossed dial: both ends already hold a live session for this peer,
    // so the younger sockets are rejected without touching the store.
    a.connect(b.local_addr()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(a.peers(), vec![NodeId::from("b")]);
    assert_eq!(b.peers(), vec![NodeId::from("a")]);
    wait_for_edges(&a, &[("a", "b")]).await;

    // Teardown still flows exactly once through the surviving session.
    b.shutdown();
    wait_for_edges(&a, &[]).await;
}

#[tokio::test]
async fn test_malformed_frame_tears_down_only_its_connection() {
    let a = start("a").await;

    // Hand-rolled peer that handshakes, then turns to garbage.
    let stream = tokio::net::TcpStream::connect(a.local_addr()).await.unwrap();
    let mut framed = FramedWrite::new(stream, FrameCodec::new());
    let hello = Hello {
        node: NodeId::from("z"),
    };
    framed.send(hello.to_frame().unwrap()).await.unwrap();
    wait_for_edges(&a, &[("a", "z")]).await;

    // A zero-length frame fails a's reader while its writer task is still
    // live; the two failures must collapse into one teardown.
    let mut stream = framed.into_inner();
    stream.write_all(&[0, 0, 0, 0, 0]).await.unwrap();
    stream.flush().await.unwrap();
    drop(stream);

    wait_for_edges(&a, &[]).await;
    assert_eq!(a.peers(), Vec::<NodeId>::new());
    // A single synthesized removal, not one per failing direction.
    assert_eq!(a.dump(), "a<->z removed v2 by a");

    // The failure stayed local to that socket; new peers still join.
    let b = start("b").await;
    b.connect(a.local_addr()).await.unwrap();
    wait_for_edges(&b, &[("a", "b")]).await;
}

#[tokio::test]
async fn test_dialing_a_dead_peer_is_fatal() {
    let a = start("a").await;
    // Port 1 on loopback is not listening.
    let err = a.connect("127.0.0.1:1".parse().unwrap()).await;
    assert!(err.is_err());
    assert_eq!(a.peers(), Vec::<NodeId>::new());
}
