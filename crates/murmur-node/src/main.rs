//! Murmur Node binary
//!
//! Runs a development community end to end: two users register, one
//! follows the other, and new tweets show up on the follower's timeline.

use murmur_account::LoginStage;
use murmur_node::{Node, NodeConfig};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=info,murmur_node=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Murmur node");

    let config = NodeConfig::from_env()?;
    let node = Node::start(config).await?;

    // Alice checks her username through the login form, then registers.
    let mut flow = node.login_flow();
    flow.type_username("alice");
    let stage = flow.next_lookup().await.map(|state| state.stage());

    let mut alice = node.app("alice");
    match stage {
        Some(LoginStage::Register) => {
            alice.register("alice", "correct horse").await?;
        }
        _ => {
            let tree = flow.login("correct horse").await?.ok_or("wrong password for alice")?;
            alice.login(tree, "alice").await?;
        }
    }

    let mut bob = node.app("bob");
    match node.accounts().find_user_tree("bob").await? {
        None => {
            bob.register("bob", "battery staple").await?;
        }
        Some(tree) => {
            let tree = node
                .accounts()
                .verify_account("bob", "battery staple", tree)
                .await?
                .ok_or("wrong password for bob")?;
            bob.login(tree, "bob").await?;
        }
    }

    if let Err(e) = bob.follow("alice").await {
        if e.is_timeout() {
            warn!(error = %e, "Follow not confirmed yet");
        } else {
            return Err(e.into());
        }
    }

    let (_subscriptions, mut live) = bob.watch_timeline().await?;
    alice.publish("hello from the community").await?;

    match tokio::time::timeout(Duration::from_secs(5), live.recv()).await {
        Ok(Some(tweet)) => info!(
            author = tweet.author.as_deref().unwrap_or("?"),
            message = %tweet.message,
            "Bob received a tweet"
        ),
        _ => warn!("No tweet arrived"),
    }

    for tweet in bob.timeline().await? {
        println!(
            "{:>12}  {}",
            tweet.author.as_deref().unwrap_or("?"),
            tweet.message
        );
    }

    alice.logout().await;
    bob.logout().await;
    node.shutdown();

    Ok(())
}
