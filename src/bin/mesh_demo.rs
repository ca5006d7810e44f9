//! Runnable demonstration: three nodes on one machine converging a
//! shared counter through set / increment / delete rounds.
//!
//! ```sh
//! RUST_LOG=info cargo run --bin mesh_demo
//! ```

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::time::sleep;

use collective::{Collective, PeerAddress};

const KEY: &str = "over.nine.thousand";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let all: Vec<PeerAddress> = (0..3u16)
        .map(|i| PeerAddress::new("127.0.0.1", 9000 + i))
        .collect();

    let mut nodes = Vec::new();
    for addr in &all {
        nodes.push(Collective::start(addr.clone(), all.clone()).await?);
    }
    sleep(Duration::from_millis(300)).await;

    for node in &nodes {
        println!(
            "{} is up with {} connections",
            node.local_addr(),
            node.connection_count().await
        );
    }

    nodes[0].set(KEY, json!(0)).await;
    sleep(Duration::from_millis(200)).await;

    for node in &nodes {
        node.increment(KEY, 9000).await;
    }
    sleep(Duration::from_millis(300)).await;

    for node in &nodes {
        println!(
            "{} sees '{KEY}' = {:?} after {} increments",
            node.local_addr(),
            node.get(KEY).await,
            nodes.len()
        );
    }

    nodes[1].delete(KEY).await;
    sleep(Duration::from_millis(300)).await;

    for node in &nodes {
        println!(
            "{} sees '{KEY}' = {:?} after delete",
            node.local_addr(),
            node.get(KEY).await
        );
    }

    Ok(())
}
