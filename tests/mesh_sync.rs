//! End-to-end mesh tests over real TCP on loopback.
//!
//! Each test owns a distinct port range so the suite can run in
//! parallel. Convergence is asynchronous, so assertions poll with a
//! generous deadline instead of sleeping a fixed time.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::sleep;

use collective::{Collective, PeerAddress};

const POLL: Duration = Duration::from_millis(50);
const ATTEMPTS: usize = 200;

fn addrs(base_port: u16, count: u16) -> Vec<PeerAddress> {
    (0..count)
        .map(|i| PeerAddress::new("127.0.0.1", base_port + i))
        .collect()
}

async fn eventually_eq(node: &Collective, path: &str, expected: Option<Value>) {
    for _ in 0..ATTEMPTS {
        if node.get(path).await == expected {
            return;
        }
        sleep(POLL).await;
    }
    panic!(
        "{} never converged: {path} = {:?}, wanted {expected:?}",
        node.local_addr(),
        node.get(path).await
    );
}

async fn eventually_count(node: &Collective, expected: usize) {
    for _ in 0..ATTEMPTS {
        if node.connection_count().await == expected {
            return;
        }
        sleep(POLL).await;
    }
    panic!(
        "{} never reached {expected} connections (at {})",
        node.local_addr(),
        node.connection_count().await
    );
}

#[tokio::test]
async fn solo_node_local_operations() {
    let all = addrs(9431, 1);
    let node = Collective::start(all[0].clone(), all).await.unwrap();

    // Candidate list minus self is empty: Ready with zero connections.
    assert_eq!(node.connection_count().await, 0);

    node.set("foo", json!("bar")).await;
    assert_eq!(node.get("foo").await, Some(json!("bar")));

    // Fresh path initializes to 0 before the first increment lands.
    node.increment("foo.count", 5).await;
    assert_eq!(node.get("foo.count").await, Some(json!(5)));
    node.increment("foo.count", -2).await;
    assert_eq!(node.get("foo.count").await, Some(json!(3)));
}

#[tokio::test]
async fn unreachable_candidate_is_dropped() {
    let local = PeerAddress::new("127.0.0.1", 9435);
    let dead = PeerAddress::new("127.0.0.1", 9436);

    // The dead candidate never answers; startup must still complete.
    let node = Collective::start(local.clone(), vec![local, dead])
        .await
        .unwrap();
    assert_eq!(node.connection_count().await, 0);
}

#[tokio::test]
async fn pair_converges_and_syncs() {
    let all = addrs(9441, 2);
    let a = Collective::start(all[0].clone(), all.clone()).await.unwrap();
    let b = Collective::start(all[1].clone(), all).await.unwrap();

    // Full mesh of two: exactly one outbound connection each.
    eventually_count(&a, 1).await;
    eventually_count(&b, 1).await;

    a.set("k", json!("v")).await;
    eventually_eq(&b, "k", Some(json!("v"))).await;

    b.delete("k").await;
    eventually_eq(&a, "k", None).await;
    eventually_eq(&b, "k", None).await;
}

#[tokio::test]
async fn increments_accumulate_across_nodes() {
    let all = addrs(9445, 2);
    let a = Collective::start(all[0].clone(), all.clone()).await.unwrap();
    let b = Collective::start(all[1].clone(), all).await.unwrap();

    eventually_count(&a, 1).await;
    eventually_count(&b, 1).await;

    a.increment("n", 7).await;
    b.increment("n", 5).await;
    a.increment("n", -2).await;

    eventually_eq(&a, "n", Some(json!(10))).await;
    eventually_eq(&b, "n", Some(json!(10))).await;
}

#[tokio::test]
async fn joining_node_bootstraps_from_snapshot() {
    let all = addrs(9451, 3);
    let a = Collective::start(all[0].clone(), all.clone()).await.unwrap();
    let b = Collective::start(all[1].clone(), all.clone()).await.unwrap();

    eventually_count(&a, 1).await;
    eventually_count(&b, 1).await;

    a.set("seed.value", json!(42)).await;
    a.set("seed.label", json!("converged")).await;
    eventually_eq(&b, "seed.value", Some(json!(42))).await;

    // A fresh node joins the converged pair and asks exactly one peer
    // for the document.
    let c = Collective::start(all[2].clone(), all).await.unwrap();
    eventually_count(&c, 2).await;
    eventually_count(&a, 2).await;
    eventually_count(&b, 2).await;

    eventually_eq(&c, "seed.value", Some(json!(42))).await;
    eventually_eq(&c, "seed.label", Some(json!("converged"))).await;

    // And the newcomer is a full member: its writes reach everyone.
    c.set("from.newcomer", json!(true)).await;
    eventually_eq(&a, "from.newcomer", Some(json!(true))).await;
    eventually_eq(&b, "from.newcomer", Some(json!(true))).await;
}

#[tokio::test]
async fn nested_writes_propagate() {
    let all = addrs(9461, 2);
    let a = Collective::start(all[0].clone(), all.clone()).await.unwrap();
    let b = Collective::start(all[1].clone(), all).await.unwrap();

    eventually_count(&a, 1).await;
    eventually_count(&b, 1).await;

    a.set("config.net.timeout", json!(30)).await;
    a.set("config.net.retries", json!(0)).await;

    eventually_eq(&b, "config.net.timeout", Some(json!(30))).await;
    eventually_eq(&b, "config.net.retries", Some(json!(0))).await;
    eventually_eq(
        &b,
        "config.net",
        Some(json!({"timeout": 30, "retries": 0})),
    )
    .await;
}

#[tokio::test]
async fn bind_failure_is_fatal() {
    let local = PeerAddress::new("127.0.0.1", 9471);
    let first = Collective::start(local.clone(), vec![local.clone()])
        .await
        .unwrap();
    assert_eq!(first.connection_count().await, 0);

    // Same address again: the listener cannot bind.
    let second = Collective::start(local.clone(), vec![local]).await;
    assert!(matches!(
        second,
        Err(collective::CollectiveError::Bind { .. })
    ));
}
