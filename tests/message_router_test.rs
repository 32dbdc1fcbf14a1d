//! Integration tests for the message router and agent messaging

use kolosal_agents::agent::AgentCore;
use kolosal_agents::config::AgentConfig;
use kolosal_agents::data::AgentData;
use kolosal_agents::domain_types::AgentId;
use kolosal_agents::functions::providers::FunctionDeps;
use kolosal_agents::router::{AgentMessage, MessageHandler, MessageRouter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn collector() -> (MessageHandler, Arc<Mutex<Vec<AgentMessage>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let handler: MessageHandler = Arc::new(move |message| {
        sink.lock().unwrap().push(message);
    });
    (handler, received)
}

async fn settle(router: &MessageRouter) {
    for _ in 0..100 {
        if router.stats().queue_depth == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Messages observed at B are a prefix-preserving subsequence of what A
/// sent, even with a competing sender interleaved.
#[tokio::test]
async fn per_pair_order_survives_competing_senders() {
    let router = MessageRouter::new();
    router.start();

    let a = AgentId::generate();
    let other = AgentId::generate();
    let b = AgentId::generate();
    let (handler, received) = collector();
    router.register(b, handler);

    for i in 0..50 {
        router.route(AgentMessage::direct(a, b, "seq", AgentData::new().with("n", i)));
        router.route(AgentMessage::direct(other, b, "noise", AgentData::new().with("n", i)));
    }
    settle(&router).await;

    let from_a: Vec<i64> = received
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m.from == a)
        .map(|m| m.payload.get_int("n").unwrap())
        .collect();
    assert_eq!(from_a, (0..50).collect::<Vec<i64>>());
    router.stop().await;
}

/// Broadcast from a running agent reaches every other running agent's
/// handler exactly once, with the sender excluded.
#[tokio::test]
async fn broadcast_fanout_across_three_agents() {
    let router = Arc::new(MessageRouter::new());
    router.start();

    let deps = FunctionDeps::offline();
    let make = |name: &str| {
        AgentCore::from_config(
            &AgentConfig {
                name: name.to_string(),
                functions: vec!["echo".to_string()],
                max_concurrent_tasks: Some(1),
                ..AgentConfig::default()
            },
            Arc::clone(&router),
            &deps,
        )
        .unwrap()
    };
    let a = make("a");
    let b = make("b");
    let c = make("c");
    a.start().await;
    b.start().await;
    c.start().await;

    a.broadcast_message("ping", AgentData::new());
    settle(&router).await;

    // delivery counting: two running receivers, sender excluded
    assert_eq!(router.stats().delivered, 2);

    // the receivers logged the message into conversation memory, the
    // sender did not
    assert_eq!(b.memory().stats().conversation_count, 1);
    assert_eq!(c.memory().stats().conversation_count, 1);
    assert_eq!(a.memory().stats().conversation_count, 0);

    a.stop().await;
    b.stop().await;
    c.stop().await;
    router.stop().await;
}

/// Stopping the receiver before dispatch drops the message without an
/// error surfacing to the sender.
#[tokio::test]
async fn message_to_stopping_agent_is_dropped() {
    let router = Arc::new(MessageRouter::new());

    let deps = FunctionDeps::offline();
    let sender = AgentCore::from_config(
        &AgentConfig {
            name: "sender".to_string(),
            max_concurrent_tasks: Some(1),
            ..AgentConfig::default()
        },
        Arc::clone(&router),
        &deps,
    )
    .unwrap();
    let receiver = AgentCore::from_config(
        &AgentConfig {
            name: "receiver".to_string(),
            max_concurrent_tasks: Some(1),
            ..AgentConfig::default()
        },
        Arc::clone(&router),
        &deps,
    )
    .unwrap();

    sender.start().await;
    receiver.start().await;

    // enqueue while the dispatcher is not yet running, then stop the
    // receiver before messages flow
    sender.send_message(receiver.id(), "late", AgentData::new());
    receiver.stop().await;
    router.start();
    settle(&router).await;

    assert_eq!(router.stats().dropped, 1);
    assert_eq!(receiver.memory().stats().conversation_count, 0);

    sender.stop().await;
    router.stop().await;
}

/// After stop_agent, no further messages are delivered to that agent's
/// handler.
#[tokio::test]
async fn stopped_agent_receives_no_further_messages() {
    let router = MessageRouter::new();
    router.start();

    let sender = AgentId::generate();
    let receiver = AgentId::generate();
    let (handler, received) = collector();
    router.register(receiver, handler);

    router.route(AgentMessage::direct(sender, receiver, "first", AgentData::new()));
    settle(&router).await;
    assert_eq!(received.lock().unwrap().len(), 1);

    router.unregister(receiver);
    for _ in 0..5 {
        router.route(AgentMessage::direct(sender, receiver, "after", AgentData::new()));
    }
    settle(&router).await;

    assert_eq!(received.lock().unwrap().len(), 1);
    assert_eq!(router.stats().dropped, 5);
    router.stop().await;
}

/// Re-registration replaces the previous handler.
#[tokio::test]
async fn re_registration_replaces_the_handler() {
    let router = MessageRouter::new();
    router.start();

    let agent = AgentId::generate();
    let (old_handler, old_received) = collector();
    let (new_handler, new_received) = collector();
    router.register(agent, old_handler);
    router.register(agent, new_handler);

    router.route(AgentMessage::direct(
        AgentId::generate(),
        agent,
        "x",
        AgentData::new(),
    ));
    settle(&router).await;

    assert!(old_received.lock().unwrap().is_empty());
    assert_eq!(new_received.lock().unwrap().len(), 1);
    router.stop().await;
}

/// Broadcast membership is observed at dispatch time, not send time.
#[tokio::test]
async fn broadcast_observes_membership_at_dispatch() {
    let router = MessageRouter::new();

    let sender = AgentId::generate();
    let early = AgentId::generate();
    let late = AgentId::generate();
    let (early_handler, early_received) = collector();
    let (late_handler, late_received) = collector();
    router.register(early, early_handler);

    // enqueued before the dispatcher runs and before `late` registers
    router.broadcast(AgentMessage::broadcast(sender, "ping", AgentData::new()));
    router.register(late, late_handler);
    router.start();
    settle(&router).await;

    assert_eq!(early_received.lock().unwrap().len(), 1);
    assert_eq!(late_received.lock().unwrap().len(), 1);
    router.stop().await;
}
