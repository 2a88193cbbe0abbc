//! End-to-end routing over the in-memory broker and store.

mod common;

use std::time::Duration;

use chat_router::common::MemberId;
use chat_router::domains::agents::FlowSettings;
use chat_router::kernel::{
    topology, BaseTopicBroker, ControlNotification, MockReplyAgent, TopologyEvent,
};

use crate::common::{settle, wait_until, RouterHarness};

#[tokio::test]
async fn agent_answers_a_human_message() {
    let h = RouterHarness::start(vec![("gpt", MockReplyAgent::new("gpt"))], FlowSettings::default()).await;
    let chat = h.create_chat(&["gpt"], None).await;

    h.say(chat, "hello").await;

    wait_until("gpt replied", || h.replies_from("gpt").len() == 1).await;
    settle().await;

    // Its own reply comes back on its queue and is ignored.
    assert_eq!(h.replies_from("gpt").len(), 1);
    assert_eq!(h.replies_from("gpt")[0].content.text, "gpt reply 1");

    let history = h.chats.history(chat).await.unwrap();
    let texts: Vec<&str> = history.iter().map(|m| m.content.text.as_str()).collect();
    assert_eq!(texts.len(), 3);
    assert!(texts[0].starts_with("Conversation created with the following members:"));
    assert_eq!(texts[1], "hello");
    assert_eq!(texts[2], "gpt reply 1");
}

#[tokio::test]
async fn topic_context_is_published_and_answered() {
    let h = RouterHarness::start(vec![("gpt", MockReplyAgent::new("gpt"))], FlowSettings::default()).await;
    let chat = h.create_chat(&["gpt"], Some("ownership in Rust")).await;

    wait_until("gpt replied", || h.replies_from("gpt").len() == 1).await;

    let history = h.chats.history(chat).await.unwrap();
    assert!(history[0].is_system());
    assert!(history[0]
        .content
        .text
        .contains("Here is the topic for the present discussion: ownership in Rust.\n"));
    assert!(history[1].is_from(&MemberId::from("gpt")));
}

#[tokio::test]
async fn replies_never_overlap_and_bursts_collapse() {
    let gpt = MockReplyAgent::new("gpt").with_latency(Duration::from_millis(50));
    let h = RouterHarness::start(vec![("gpt", gpt)], FlowSettings::default()).await;
    let chat = h.create_chat(&["gpt"], None).await;

    for i in 0..5 {
        h.say(chat, &format!("message {}", i)).await;
    }

    wait_until("a reply", || !h.replies_from("gpt").is_empty()).await;
    wait_until("idle", || h.is_idle()).await;
    settle().await;

    let agent = h.agent("gpt");
    assert_eq!(agent.max_concurrency(chat), 1);
    // The first message runs, the rest collapse onto the newest.
    assert!(agent.call_count() <= 2, "calls: {}", agent.call_count());
    assert_eq!(h.replies_from("gpt").len(), agent.call_count());
}

#[tokio::test]
async fn human_with_two_agents_gets_one_answer_from_each() {
    let a = MockReplyAgent::new("a").with_reply("from a").always_silent();
    let b = MockReplyAgent::new("b").with_reply("from b").always_silent();
    let h = RouterHarness::start(vec![("a", a), ("b", b)], FlowSettings::default()).await;
    let chat = h.create_chat(&["a", "b"], None).await;

    h.say(chat, "hi both").await;

    wait_until("both replied", || {
        h.replies_from("a").len() == 1 && h.replies_from("b").len() == 1
    })
    .await;
    // Each agent also sees the other's reply and stays silent.
    wait_until("both saw the other", || {
        h.agent("a").completed_count() == 2 && h.agent("b").completed_count() == 2
    })
    .await;
    settle().await;

    assert_eq!(h.replies_from("a")[0].content.text, "from a");
    assert_eq!(h.replies_from("b")[0].content.text, "from b");
    assert_eq!(h.deps.transport.published_messages().len(), 3);
}

#[tokio::test]
async fn typing_brackets_every_reply() {
    let gpt = MockReplyAgent::new("gpt").with_silence();
    let h = RouterHarness::start(vec![("gpt", gpt)], FlowSettings::default()).await;
    let chat = h.create_chat(&["gpt"], None).await;

    h.say(chat, "first").await;
    wait_until("first call done", || h.agent("gpt").completed_count() == 1).await;
    wait_until("idle", || h.is_idle()).await;

    h.say(chat, "second").await;
    wait_until("second reply", || h.replies_from("gpt").len() == 1).await;

    assert_eq!(
        h.deps.transport.typing_for(&MemberId::from("gpt")),
        vec![true, false, true, false]
    );
}

#[tokio::test]
async fn failed_reply_releases_the_lock() {
    let gpt = MockReplyAgent::new("gpt").with_failure("upstream timeout");
    let h = RouterHarness::start(vec![("gpt", gpt)], FlowSettings::default()).await;
    let chat = h.create_chat(&["gpt"], None).await;

    h.say(chat, "first").await;
    wait_until("failed call done", || h.agent("gpt").completed_count() == 1).await;
    wait_until("idle", || h.is_idle()).await;
    assert!(h.replies_from("gpt").is_empty());

    h.say(chat, "second").await;
    wait_until("reply after failure", || h.replies_from("gpt").len() == 1).await;
    assert_eq!(h.replies_from("gpt")[0].content.text, "gpt reply 2");
}

#[tokio::test]
async fn added_member_starts_consuming() {
    let a = MockReplyAgent::new("a").always_silent();
    let b = MockReplyAgent::new("b").always_silent();
    let h = RouterHarness::start(vec![("a", a), ("b", b)], FlowSettings::default()).await;
    let chat = h.create_chat(&["a"], None).await;

    h.chats.add_member(chat, &MemberId::from("b")).await.unwrap();

    assert!(h
        .deps
        .broker
        .has_queue(&topology::member_queue(chat, &MemberId::from("b"))));
    assert!(h
        .chats
        .directory()
        .members_of(chat)
        .contains(&MemberId::from("b")));

    // The join notice is the first thing b sees.
    wait_until("b consumed the join notice", || h.agent("b").calls_for(chat) == 1).await;

    h.say(chat, "welcome").await;
    wait_until("b answered the human", || h.agent("b").calls_for(chat) == 2).await;

    let history = h.chats.history(chat).await.unwrap();
    assert!(history
        .iter()
        .any(|m| m.is_system() && m.content.text == "b has joined the conversation."));
}

#[tokio::test]
async fn removed_member_stops_receiving() {
    let gpt = MockReplyAgent::new("gpt");
    let h = RouterHarness::start(vec![("gpt", gpt)], FlowSettings::default()).await;
    let chat = h.create_chat(&["gpt"], None).await;
    let queue = topology::member_queue(chat, &MemberId::from("gpt"));

    h.say(chat, "hi").await;
    wait_until("gpt replied", || h.replies_from("gpt").len() == 1).await;
    wait_until("idle", || h.is_idle()).await;

    h.chats.remove_member(chat, &MemberId::from("gpt")).await.unwrap();
    assert!(!h.deps.broker.has_queue(&queue));
    assert!(h
        .deps
        .broker
        .topology_events()
        .contains(&TopologyEvent::QueueDeleted { name: queue }));

    h.say(chat, "anyone there?").await;
    settle().await;

    assert_eq!(h.agent("gpt").call_count(), 1);
    let chat_record = h.chats.chat(chat).await.unwrap();
    assert!(!chat_record.has_member(&MemberId::from("gpt")));
}

#[tokio::test]
async fn re_added_member_is_consumed_again() {
    let h = RouterHarness::start(
        vec![("gpt", MockReplyAgent::new("gpt").always_silent())],
        FlowSettings::default(),
    )
    .await;
    let chat = h.create_chat(&["gpt"], None).await;
    let gpt = MemberId::from("gpt");

    h.say(chat, "hi").await;
    wait_until("first call", || h.agent("gpt").call_count() == 1).await;

    // The old consumer may still be draining its deleted queue here.
    h.chats.remove_member(chat, &gpt).await.unwrap();
    h.chats.add_member(chat, &gpt).await.unwrap();
    h.orchestrator.subscribe(chat, &gpt).await.unwrap();
    assert!(h.deps.broker.is_consumed(chat, &gpt).await.unwrap());

    // The join notice, then the human.
    wait_until("join notice consumed", || h.agent("gpt").call_count() == 2).await;
    h.say(chat, "welcome back").await;
    wait_until("answered after re-add", || h.agent("gpt").call_count() == 3).await;
    settle().await;

    assert_eq!(h.agent("gpt").call_count(), 3);
}

#[tokio::test]
async fn stale_new_chat_notification_is_ignored() {
    let h = RouterHarness::start(
        vec![
            ("a", MockReplyAgent::new("a").always_silent()),
            ("b", MockReplyAgent::new("b").always_silent()),
        ],
        FlowSettings::default(),
    )
    .await;
    let chat = h.create_chat(&["a"], None).await;
    let b = MemberId::from("b");

    h.orchestrator
        .handle_control(&b, ControlNotification::NewChat { chat_id: chat })
        .await;

    assert!(!h.deps.broker.has_queue(&topology::member_queue(chat, &b)));
    assert!(!h.chats.directory().members_of(chat).contains(&b));

    h.say(chat, "hello").await;
    wait_until("a heard it", || h.agent("a").call_count() == 1).await;
    settle().await;
    assert_eq!(h.agent("b").call_count(), 0);
}

#[tokio::test]
async fn chat_topology_has_one_queue_per_member() {
    let h = RouterHarness::start(
        vec![
            ("a", MockReplyAgent::new("a").always_silent()),
            ("b", MockReplyAgent::new("b").always_silent()),
        ],
        FlowSettings::default(),
    )
    .await;
    let chat = h.create_chat(&["a", "b"], None).await;

    let exchange = topology::chat_exchange(chat);
    let mut bound = h.deps.broker.bound_queues(&exchange);
    bound.sort();
    assert_eq!(
        bound,
        vec![
            format!("{}_a_queue", chat),
            format!("{}_b_queue", chat),
            format!("{}_user_queue", chat),
        ]
    );
    assert_eq!(h.deps.broker.kind(), "memory");
}

#[tokio::test]
async fn agent_resubscribes_to_known_chats_on_start() {
    let h = RouterHarness::start(
        vec![("gpt", MockReplyAgent::new("gpt").always_silent())],
        FlowSettings::default(),
    )
    .await;
    let chat = h.create_chat(&["gpt"], None).await;
    h.say(chat, "before restart").await;
    wait_until("first call", || h.agent("gpt").call_count() == 1).await;

    // A second start is a no-op for running consumers.
    h.orchestrator.start().await.unwrap();
    h.say(chat, "after restart").await;
    wait_until("second call", || h.agent("gpt").call_count() == 2).await;
    settle().await;

    assert_eq!(h.agent("gpt").call_count(), 2);
}
