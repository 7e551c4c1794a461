#![allow(dead_code)]

pub mod flaky;
pub mod routers;

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::broadcast::{Message, Topic};
use dispatch_core::context::DispatchContext;
use tokio::sync::broadcast::Receiver;

/// Wait for every arrival, completion and route task spawned so far.
pub async fn drain(ctx: &Arc<DispatchContext>) {
    ctx.tasks.close();
    tokio::time::timeout(Duration::from_secs(10), ctx.tasks.wait())
        .await
        .expect("background tasks should drain");
    ctx.tasks.reopen();
}

/// Everything currently queued on a subscription.
pub fn received(rx: &mut Receiver<Message>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

pub fn on_topic(messages: &[Message], topic: Topic) -> Vec<&Message> {
    messages.iter().filter(|m| m.topic == topic).collect()
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
