//! Pause, resume, reply delay and auto-pause through the full pipeline.

mod common;

use std::time::Duration;

use chat_router::common::MemberId;
use chat_router::domains::agents::{FlowSettings, RoutingKey};
use chat_router::kernel::MockReplyAgent;

use crate::common::{settle, wait_until, RouterHarness};

fn auto_pause(threshold: u32) -> FlowSettings {
    FlowSettings {
        auto_pause_enabled: true,
        auto_pause_threshold: threshold,
        ..Default::default()
    }
}

#[tokio::test]
async fn pause_holds_messages_and_resume_answers_once() {
    let h = RouterHarness::start(vec![("gpt", MockReplyAgent::new("gpt"))], FlowSettings::default()).await;
    let chat = h.create_chat(&["gpt"], None).await;

    h.orchestrator.pause().await;
    for text in ["one", "two", "three"] {
        h.say(chat, text).await;
    }

    wait_until("message held", || h.orchestrator.status().pending == 1).await;
    settle().await;
    assert_eq!(h.agent("gpt").call_count(), 0);

    let resumed = h.orchestrator.resume().await;
    assert_eq!(resumed, 1);

    wait_until("gpt replied", || h.replies_from("gpt").len() == 1).await;
    settle().await;
    assert_eq!(h.agent("gpt").call_count(), 1);
    assert_eq!(
        h.deps.transport.pause_statuses(),
        vec![(true, false), (false, false)]
    );
    assert_eq!(h.orchestrator.status().pending, 0);
}

#[tokio::test]
async fn resume_answers_once_per_chat() {
    let h = RouterHarness::start(vec![("gpt", MockReplyAgent::new("gpt"))], FlowSettings::default()).await;
    let first = h.create_chat(&["gpt"], None).await;
    let second = h.create_chat(&["gpt"], None).await;

    h.orchestrator.pause().await;
    for chat in [first, second] {
        h.say(chat, "are you there?").await;
        h.say(chat, "hello?").await;
    }
    wait_until("both held", || h.orchestrator.status().pending == 2).await;

    assert_eq!(h.orchestrator.resume().await, 2);
    wait_until("both replied", || h.replies_from("gpt").len() == 2).await;
    settle().await;

    let agent = h.agent("gpt");
    assert_eq!(agent.calls_for(first), 1);
    assert_eq!(agent.calls_for(second), 1);
}

#[tokio::test]
async fn held_message_is_dropped_once_the_agent_has_left() {
    let h = RouterHarness::start(vec![("gpt", MockReplyAgent::new("gpt"))], FlowSettings::default()).await;
    let chat = h.create_chat(&["gpt"], None).await;

    h.orchestrator.pause().await;
    h.say(chat, "question").await;
    wait_until("message held", || h.orchestrator.status().pending == 1).await;

    h.chats.remove_member(chat, &MemberId::from("gpt")).await.unwrap();
    assert_eq!(h.orchestrator.resume().await, 1);

    settle().await;
    wait_until("idle", || h.is_idle()).await;
    assert!(h.replies_from("gpt").is_empty());
    assert_eq!(h.agent("gpt").call_count(), 0);
}

#[tokio::test]
async fn resume_without_backlog_is_harmless() {
    let h = RouterHarness::start(vec![("gpt", MockReplyAgent::new("gpt"))], FlowSettings::default()).await;

    assert_eq!(h.orchestrator.resume().await, 0);
    h.orchestrator.pause().await;
    h.orchestrator.pause().await;
    assert!(h.orchestrator.status().is_paused);
    assert_eq!(h.orchestrator.resume().await, 0);
    assert!(!h.orchestrator.status().is_paused);
}

#[tokio::test]
async fn agent_chatter_trips_auto_pause() {
    let h = RouterHarness::start(
        vec![("a", MockReplyAgent::new("a")), ("b", MockReplyAgent::new("b"))],
        auto_pause(3),
    )
    .await;
    let chat = h.create_chat(&["a", "b"], None).await;

    h.say(chat, "discuss").await;

    wait_until("auto-paused", || h.orchestrator.status().is_paused).await;
    let status = h.orchestrator.status();
    assert!(status.is_auto_pause);
    assert!(status.pending >= 1);
    wait_until("auto-pause announced", || {
        h.deps.transport.pause_statuses().contains(&(true, true))
    })
    .await;

    // Nothing new gets through while paused.
    wait_until("idle", || h.is_idle()).await;
    let published = h.deps.transport.published_messages().len();
    settle().await;
    assert_eq!(h.deps.transport.published_messages().len(), published);
}

#[tokio::test]
async fn message_that_trips_auto_pause_runs_once_after_resume() {
    let a = MockReplyAgent::new("a")
        .with_latency(Duration::from_millis(50))
        .with_reply("a speaks")
        .always_silent();
    let b = MockReplyAgent::new("b").always_silent();
    let c = MockReplyAgent::new("c").always_silent();
    let h = RouterHarness::start(vec![("a", a), ("b", b), ("c", c)], auto_pause(2)).await;
    let chat = h.create_chat(&["a", "b", "c"], None).await;
    let listeners = || h.agent("b").call_count() + h.agent("c").call_count();

    h.say(chat, "discuss").await;

    // b and c both hear "a speaks"; the second delivery reaches the threshold.
    wait_until("auto-paused", || h.orchestrator.status().is_auto_pause).await;
    wait_until("the other listener answered", || listeners() == 3).await;
    wait_until("idle", || h.is_idle()).await;

    let held = h.orchestrator.flow().pending_messages();
    assert_eq!(held.len(), 1);
    let (key, message) = &held[0];
    assert!(message.is_from(&MemberId::from("a")));
    assert_eq!(message.content.text, "a speaks");
    assert_ne!(key.agent_id, MemberId::from("a"));
    let held_by = key.agent_id.clone();

    settle().await;
    assert_eq!(listeners(), 3);
    assert_eq!(h.agent(held_by.as_str()).calls_for(chat), 1);

    assert_eq!(h.orchestrator.resume().await, 1);
    wait_until("held message answered", || listeners() == 4).await;
    settle().await;

    assert_eq!(listeners(), 4);
    assert_eq!(h.agent(held_by.as_str()).calls_for(chat), 2);
    assert_eq!(h.agent("a").call_count(), 1);
    let status = h.orchestrator.status();
    assert!(!status.is_paused);
    assert_eq!(status.pending, 0);
    assert_eq!(status.message_count, 1);
}

#[tokio::test]
async fn human_message_resets_the_count_while_a_reply_is_in_flight() {
    let a = MockReplyAgent::new("a")
        .with_latency(Duration::from_millis(50))
        .with_reply("a speaks")
        .always_silent();
    let b = MockReplyAgent::new("b")
        .with_latency(Duration::from_millis(600))
        .always_silent();
    let h = RouterHarness::start(vec![("a", a), ("b", b)], auto_pause(3)).await;
    let chat = h.create_chat(&["a", "b"], None).await;
    let b_key = RoutingKey::new(MemberId::from("b"), chat);

    h.say(chat, "first").await;
    wait_until("a's reply counted", || h.orchestrator.status().message_count == 1).await;
    assert!(h.orchestrator.lock().is_held(&b_key));
    assert_eq!(h.agent("b").completed_count(), 0);

    h.say(chat, "second").await;
    wait_until("count reset", || h.orchestrator.status().message_count == 0).await;

    // b is still answering "first".
    assert!(h.orchestrator.lock().is_held(&b_key));
    assert_eq!(h.agent("b").completed_count(), 0);
    assert!(!h.orchestrator.status().is_paused);
}

#[tokio::test]
async fn human_message_resets_the_chatter_count() {
    let a = MockReplyAgent::new("a").with_reply("from a").always_silent();
    let b = MockReplyAgent::new("b").with_reply("from b").always_silent();
    let h = RouterHarness::start(vec![("a", a), ("b", b)], auto_pause(3)).await;
    let chat = h.create_chat(&["a", "b"], None).await;

    h.say(chat, "hi").await;
    wait_until("each saw two messages", || {
        h.agent("a").completed_count() == 2 && h.agent("b").completed_count() == 2
    })
    .await;
    // Each agent reply was counted once, by the other agent.
    assert_eq!(h.orchestrator.status().message_count, 2);

    h.say(chat, "and now?").await;
    wait_until("each saw the human again", || {
        h.agent("a").completed_count() == 3 && h.agent("b").completed_count() == 3
    })
    .await;

    let status = h.orchestrator.status();
    assert_eq!(status.message_count, 0);
    assert!(!status.is_paused);
}

#[tokio::test]
async fn reply_delay_is_applied() {
    let h = RouterHarness::start(vec![("gpt", MockReplyAgent::new("gpt"))], FlowSettings::default()).await;
    let chat = h.create_chat(&["gpt"], None).await;
    h.orchestrator.set_delay(Duration::from_millis(150));
    assert_eq!(h.orchestrator.status().delay_ms, 150);

    let started = tokio::time::Instant::now();
    h.say(chat, "take your time").await;
    wait_until("gpt replied", || h.replies_from("gpt").len() == 1).await;

    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn auto_pause_can_be_reconfigured() {
    let h = RouterHarness::start(vec![("gpt", MockReplyAgent::new("gpt"))], FlowSettings::default()).await;

    h.orchestrator.set_auto_pause(true, Some(0));
    let status = h.orchestrator.status();
    assert!(status.auto_pause_enabled);
    assert_eq!(status.auto_pause_threshold, 1);

    h.orchestrator.set_auto_pause(false, None);
    let status = h.orchestrator.status();
    assert!(!status.auto_pause_enabled);
    assert_eq!(status.auto_pause_threshold, 1);
}
