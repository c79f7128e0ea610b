//! Gateway end-to-end tests
//!
//! Every test plays the server through an in-memory transport; none needs a network.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use integration_tests::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_gateway::protocol::{CloseCode, GatewayMessage, OpCode, UpdatePresencePayload};
use switchboard_gateway::ratelimit::{BucketConfig, RateLimiter};
use switchboard_gateway::transport::{MemoryTransportHandle, TransportEvent, CLOSE_RESUMABLE};
use switchboard_gateway::{
    GatewayCommand, GatewayError, IdentifyGate, IdentifyMetric, ShardFault, ShardSettings,
    ShardStatus,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_then_resume_after_server_reconnect() {
    let harness = TestShard::new(ShardSettings::new("token"));
    let server = &harness.server;

    let identify = harness.connect_with_hello(45_000).await;
    assert_eq!(identify.op, OpCode::Identify);

    let first = expect_written(server).await;
    assert_eq!(first, GatewayMessage::heartbeat(None));

    server.push(&ready(1, "abc"));
    server.push(&GatewayMessage::heartbeat_ack());
    settle().await;
    assert_eq!(harness.shard.status(), ShardStatus::Active);

    let started = Instant::now();
    let second = expect_written(server).await;
    assert_eq!(second, GatewayMessage::heartbeat(Some(1)));
    assert!(started.elapsed() >= Duration::from_secs(45));
    assert!(started.elapsed() < Duration::from_secs(46));
    assert!(server.try_next_event().is_none());
    assert_eq!(server.opens(), 1);

    server.push(&GatewayMessage::heartbeat_ack());
    server.push(&GatewayMessage::reconnect());

    assert_eq!(
        expect_event(server).await,
        TransportEvent::Closed {
            code: CLOSE_RESUMABLE
        }
    );
    assert_eq!(expect_opened(server).await, endpoint(RESUME_URL));

    server.push(&GatewayMessage::hello(45_000));
    let resume = expect_written(server).await;
    let payload = resume.as_resume().expect("resume after reconnect");
    assert_eq!(payload.session_id, "abc");
    assert_eq!(payload.seq, 1);
    assert!(resume.as_identify().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sequence_gap_reconnects_without_advancing() {
    let mut harness = TestShard::new(ShardSettings::new("token"));
    harness.connect_with_hello(45_000).await;
    let server = harness.server.clone();
    assert_eq!(expect_written(&server).await.op, OpCode::Heartbeat);

    server.push(&ready(1, "abc"));
    server.push(&dispatch("MESSAGE_CREATE", 3));

    assert_eq!(
        expect_event(&server).await,
        TransportEvent::Closed {
            code: CLOSE_RESUMABLE
        }
    );
    assert_eq!(harness.shard.session().sequence(), 1);

    let ready_event = harness.events.recv().await.expect("READY forwarded");
    assert_eq!(ready_event.name, "READY");
    assert!(harness.events.try_recv().is_err());

    expect_opened(&server).await;
    server.push(&GatewayMessage::hello(45_000));
    let resume = expect_written(&server).await.as_resume().expect("resume");
    assert_eq!(resume.seq, 1);
}

#[tokio::test(start_paused = true)]
async fn test_compressed_frames_and_ignored_events() {
    let settings = ShardSettings::new("token").with_ignore_events(["TYPING_START"]);
    let mut harness = TestShard::new(settings);
    harness.connect_with_hello(45_000).await;
    let server = harness.server.clone();

    server.push_compressed(&ready(1, "abc")).unwrap();
    server.push(&dispatch("TYPING_START", 2));
    server.push(&dispatch("MESSAGE_CREATE", 3));

    assert_eq!(harness.events.recv().await.unwrap().name, "READY");
    let event = harness.events.recv().await.unwrap();
    assert_eq!(event.name, "MESSAGE_CREATE");
    assert_eq!(event.payload, br#"{"id":"1"}"#);
    assert_eq!(harness.shard.session().sequence(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_session_identifies_again() {
    let settings = ShardSettings::new("token").with_time_scale(0.01);
    let harness = TestShard::new(settings);
    harness.connect_with_hello(45_000).await;
    let server = &harness.server;
    assert_eq!(expect_written(server).await.op, OpCode::Heartbeat);

    server.push(&ready(1, "abc"));
    settle().await;
    assert!(!harness.shard.session().is_virgin());

    let started = Instant::now();
    server.push(&GatewayMessage::invalid_session(false));
    let identify = expect_written(server).await;
    assert_eq!(identify.op, OpCode::Identify);
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert!(started.elapsed() <= Duration::from_millis(50));
    assert!(harness.shard.session().is_virgin());
    assert_eq!(server.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_invalidating_close_code_identifies() {
    let harness = TestShard::new(ShardSettings::new("token"));
    harness.connect_with_hello(45_000).await;
    let server = &harness.server;
    assert_eq!(expect_written(server).await.op, OpCode::Heartbeat);

    server.push(&ready(1, "abc"));
    server.push_close(CloseCode::InvalidSequence.as_u16());

    assert_eq!(expect_opened(server).await, endpoint(GATEWAY_URL));
    server.push(&GatewayMessage::hello(45_000));
    let handshake = expect_written(server).await;
    assert_eq!(handshake.op, OpCode::Identify);
}

#[tokio::test(start_paused = true)]
async fn test_unrecoverable_close_reports_fault() {
    let mut harness = TestShard::new(ShardSettings::new("token"));
    harness.connect_with_hello(45_000).await;

    harness.server.push_close(CloseCode::AuthenticationFailed.as_u16());
    let fault = harness.faults.recv().await.expect("fault reported");
    assert_eq!(
        fault,
        ShardFault {
            shard_id: 0,
            code: CloseCode::AuthenticationFailed
        }
    );

    wait_for(|| (harness.shard.status() == ShardStatus::Disconnected).then_some(())).await;
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(harness.server.opens(), 1);
    assert!(!harness.shard.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_missing_heartbeat_ack_reconnects() {
    let harness = TestShard::new(ShardSettings::new("token"));
    harness.connect_with_hello(1_000).await;
    let server = &harness.server;
    assert_eq!(expect_written(server).await.op, OpCode::Heartbeat);

    // No ack for the first heartbeat
    assert_eq!(
        expect_event(server).await,
        TransportEvent::Closed {
            code: CLOSE_RESUMABLE
        }
    );
    expect_opened(server).await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_trip_after_threshold() {
    let harness = TestShard::new(ShardSettings::new("token"));
    harness.connect_with_hello(45_000).await;
    let server = &harness.server;
    assert_eq!(expect_written(server).await.op, OpCode::Heartbeat);

    for _ in 0..9 {
        server.push_raw(b"{not json".to_vec());
    }
    settle().await;
    assert!(server.try_next_event().is_none());

    server.push_raw(b"{not json".to_vec());
    assert_eq!(
        expect_event(server).await,
        TransportEvent::Closed {
            code: CLOSE_RESUMABLE
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_reconnects_once() {
    let harness = TestShard::new(ShardSettings::new("token"));
    harness.connect_with_hello(45_000).await;
    let server = &harness.server;
    assert_eq!(expect_written(server).await.op, OpCode::Heartbeat);

    server.fail_writes(true);
    harness
        .shard
        .emit(UpdatePresencePayload::status("idle").into())
        .unwrap();

    assert_eq!(
        expect_event(server).await,
        TransportEvent::Closed {
            code: CLOSE_RESUMABLE
        }
    );
    server.fail_writes(false);
    expect_opened(server).await;
    server.push(&GatewayMessage::hello(45_000));

    // The failed command is still queued and goes out on the new connection
    loop {
        match expect_event(server).await {
            TransportEvent::Written(message) if message.op == OpCode::PresenceUpdate => break,
            TransportEvent::Written(_) => {}
            other => panic!("unexpected {other:?} after reconnecting"),
        }
    }
    settle().await;
    assert_eq!(server.opens(), 2);
    assert!(harness.shard.queued().is_empty());
}

/// Wait for the next `Opened`, skipping closes and writes
async fn next_open(server: &MemoryTransportHandle) -> Instant {
    loop {
        if let TransportEvent::Opened { .. } = expect_event(server).await {
            return Instant::now();
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_grows_then_resets() {
    let settings = ShardSettings::new("token").with_handshake_timeout(Duration::from_secs(1));
    let harness = TestShard::new(settings);
    let server = &harness.server;
    let reconnecting = {
        let shard = harness.shard.clone();
        tokio::spawn(async move { shard.reconnect_loop().await })
    };

    // Each wait adds 4 + 2 * attempt seconds, and falls back to 60s once past five minutes
    let waits = [9, 17, 27, 39, 53, 69, 87, 107, 129, 153, 179, 207, 237, 269, 60];
    let mut previous = next_open(server).await;
    for wait in waits {
        let opened = next_open(server).await;
        let gap = opened - previous;
        // One second of handshake timeout precedes every wait
        let expected = Duration::from_secs(wait + 1);
        assert!(
            gap >= expected && gap < expected + Duration::from_millis(100),
            "expected a {expected:?} gap, got {gap:?}"
        );
        previous = opened;
    }
    assert!(!reconnecting.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_reconnect_backoff() {
    let settings = ShardSettings::new("token").with_handshake_timeout(Duration::from_secs(1));
    let harness = TestShard::new(settings);
    let server = &harness.server;
    let reconnecting = {
        let shard = harness.shard.clone();
        tokio::spawn(async move { shard.reconnect_loop().await })
    };

    expect_opened(server).await;
    assert_eq!(
        expect_event(server).await,
        TransportEvent::Closed {
            code: CLOSE_RESUMABLE
        }
    );
    // Inside the 9s wait before the second attempt
    tokio::time::sleep(Duration::from_secs(2)).await;
    harness.shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), reconnecting)
        .await
        .expect("reconnect loop kept waiting after shutdown")
        .expect("reconnect loop panicked");
    assert!(matches!(result, Err(GatewayError::Shutdown)));
    assert_eq!(server.opens(), 1);
}

// ============================================================================
// Outgoing commands
// ============================================================================

#[test]
fn test_rate_limiter_accepts_exactly_capacity() {
    let limiter = RateLimiter::new(BucketConfig::global())
        .with_bucket("presence_update", BucketConfig::new(5, Duration::from_secs(60)));
    let now = Instant::now();

    let accepted = (0..12)
        .filter(|_| limiter.request_at("presence_update", now))
        .count();
    assert_eq!(accepted, 5);

    let later = now + Duration::from_secs(61);
    assert!(limiter.request_at("presence_update", later));
}

#[tokio::test(start_paused = true)]
async fn test_queue_overwrite_and_emit_loop() {
    let harness = TestShard::new(ShardSettings::new("token"));
    harness.connect_with_hello(45_000).await;
    let server = &harness.server;
    assert_eq!(expect_written(server).await.op, OpCode::Heartbeat);

    let shard = &harness.shard;
    shard.emit(UpdatePresencePayload::status("idle").into()).unwrap();
    shard.emit(UpdatePresencePayload::status("dnd").into()).unwrap();
    assert_eq!(
        shard.queued(),
        vec![GatewayCommand::from(UpdatePresencePayload::status("dnd"))]
    );

    let written = expect_written(server).await;
    assert_eq!(written.op, OpCode::PresenceUpdate);
    assert_eq!(written.d.as_ref().unwrap()["status"], "dnd");
    settle().await;
    assert!(shard.queued().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_emit_rejects_beyond_presence_bucket() {
    let harness = TestShard::new(ShardSettings::new("token"));
    let shard = &harness.shard;

    for status in ["online", "idle", "dnd", "invisible", "online"] {
        shard.emit(UpdatePresencePayload::status(status).into()).unwrap();
    }
    let err = shard
        .emit(UpdatePresencePayload::status("idle").into())
        .unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited { command: "presence_update", .. }));
    assert_eq!(shard.queued().len(), 1);
}

// ============================================================================
// Identify admission
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_identify_gate_withholds_after_daily_ceiling() {
    let metric = Arc::new(IdentifyMetric::new(3, IdentifyMetric::DEFAULT_WINDOW));
    metric.record();
    metric.record();

    let shutdown = CancellationToken::new();
    let gate = IdentifyGate::spawn(TEST_RATE_LIMIT, metric.clone(), shutdown.clone());

    let started = Instant::now();
    gate.run(0, Box::pin(async { Ok::<(), GatewayError>(()) }))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(metric.count(), 3);

    let ran = Arc::new(AtomicBool::new(false));
    let second = {
        let gate = gate.clone();
        let ran = ran.clone();
        tokio::spawn(async move {
            gate.run(
                1,
                Box::pin(async move {
                    ran.store(true, Ordering::Release);
                    Ok::<(), GatewayError>(())
                }),
            )
            .await
        })
    };

    tokio::time::sleep(Duration::from_secs(23 * 60 * 60)).await;
    assert!(!ran.load(Ordering::Acquire));
    assert!(!second.is_finished());

    tokio::time::sleep(Duration::from_secs(60 * 60 + 1)).await;
    second.await.unwrap().unwrap();
    assert!(ran.load(Ordering::Acquire));
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_identify_gate_serializes_shards() {
    let manager = TestManager::new(3);
    let connecting = {
        let manager = manager.manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };

    for id in 0..3 {
        let identify = manager.accept(id).await;
        assert_eq!(identify.as_identify().unwrap().shard, [id, 3]);
    }
    connecting.await.unwrap().unwrap();
    assert_eq!(manager.manager.identify_metric().count(), 3);
}

// ============================================================================
// Shard manager
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_manager_broadcasts_and_routes() {
    let manager = TestManager::new(2);
    let connecting = {
        let manager = manager.manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };
    manager.accept(0).await;
    manager.accept(1).await;
    connecting.await.unwrap().unwrap();

    let unhandled = manager
        .manager
        .emit(UpdatePresencePayload::status("idle").into())
        .unwrap();
    assert!(unhandled.is_empty());

    for id in 0..2 {
        let server = manager.fleet.handle(id).unwrap();
        let mut saw_presence = false;
        while !saw_presence {
            saw_presence = expect_written(&server).await.op == OpCode::PresenceUpdate;
        }
    }

    let request = members_request(vec![guild_on(1, 2, 3)]);
    assert!(manager.manager.emit(request).unwrap().is_empty());
    let server = manager.fleet.handle(1).unwrap();
    loop {
        let written = expect_written(&server).await;
        if written.op == OpCode::RequestGuildMembers {
            assert_eq!(written.d.unwrap()["guild_id"], serde_json::json!([guild_on(1, 2, 3).to_string()]));
            break;
        }
    }
}

#[tokio::test]
async fn test_redistribution_conserves_batched_entities() {
    for (before, after) in [(1, 4), (2, 3), (3, 2), (4, 1), (5, 7)] {
        let manager = TestManager::new(before);
        manager.manager.init().await.unwrap();

        manager.manager.emit(members_request(guilds(0..12))).unwrap();
        manager.manager.emit(members_request(guilds(6..20))).unwrap();
        manager.manager.emit(members_request(guilds(3..5))).unwrap();

        let mut expected = queued_entities(&manager);
        expected.sort();
        assert_eq!(expected.len(), 12 + 14 + 2);

        manager.metadata.set_shards(after);
        let unhandled = manager.manager.redistribute().await.unwrap();
        assert!(unhandled.is_empty());
        assert_eq!(manager.manager.shard_count(), after);

        let mut actual = queued_entities(&manager);
        actual.sort();
        assert_eq!(actual, expected, "{before} -> {after} shards");
    }
}

fn queued_entities(manager: &TestManager) -> Vec<switchboard_core::Snowflake> {
    manager
        .manager
        .shards()
        .iter()
        .flat_map(|shard| shard.queued())
        .flat_map(|command| command.entities())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_sharding_required_rescales_automatically() {
    let manager = TestManager::new(1);
    let connecting = {
        let manager = manager.manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };
    manager.accept(0).await;
    connecting.await.unwrap().unwrap();

    let old = manager.fleet.handle(0).unwrap();
    manager.metadata.set_shards(2);
    old.push_close(CloseCode::ShardingRequired.as_u16());

    wait_for(|| (manager.manager.shard_count() == 2).then_some(())).await;
    for id in 0..2 {
        let handshake = manager.accept(id).await;
        assert_eq!(handshake.as_identify().unwrap().shard, [id, 2]);
    }
}

#[tokio::test]
async fn test_disconnect_clears_sessions() {
    let manager = TestManager::new(1);
    manager.manager.init().await.unwrap();
    let shard = manager.manager.get_shard(0).unwrap();
    shard.session().set_ready("abc", None);
    shard.session().advance(1).unwrap();

    manager.manager.disconnect().await.unwrap();
    assert!(shard.session().is_virgin());
    assert!(manager.manager.heartbeat_latencies().is_empty());
}
