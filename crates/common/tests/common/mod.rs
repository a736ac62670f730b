//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::time::Duration;

use common::events::{Event, Message};
use serde_json::{json, Value};
use tokio::sync::broadcast::Receiver;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn profile() -> Value {
    json!({
        "name": "John Doe",
        "friends": ["did:key:z6MkAlice", "did:key:z6MkBob"],
    })
}

/// Wait for the first event matching `pred`
pub async fn next_event<F>(rx: &mut Receiver<Event>, timeout: Duration, mut pred: F) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Wait for the next inbound message whose `type` is `kind`
pub async fn next_message(rx: &mut Receiver<Event>, kind: &str) -> Option<Message> {
    let event = next_event(rx, Duration::from_secs(5), |event| {
        matches!(event, Event::Message(message) if message.kind() == Some(kind))
    })
    .await?;
    match event {
        Event::Message(message) => Some(message),
        _ => None,
    }
}
