//! Gateway integration tests
//!
//! The supervisor talks to a scripted mock gateway; each test plays the
//! server side frame by frame.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::time::Duration;

use cord_core::{Intents, Snowflake};
use cord_gateway::protocol::{CloseCode, GatewayMessage, OpCode};
use cord_gateway::{GatewayError, GatewayEvent, SessionStatus};
use integration_tests::*;
use serde_json::json;

/// Connect the supervisor and play Hello + Identify + READY
async fn connect_ready(
    gateway: &mut MockGateway,
    supervisor: &cord_gateway::GatewaySupervisor,
    interval_ms: u64,
    resume_url: Option<&str>,
) -> MockConnection {
    let connect = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };

    let mut conn = gateway.accept().await;
    conn.send(hello(interval_ms));
    conn.recv_op(OpCode::Identify).await;
    conn.send(ready(1, &[], resume_url));

    connect.await.unwrap().unwrap();
    conn
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_identify_and_ready() {
    init_test_tracing();

    let mut gateway = MockGateway::start().await.unwrap();
    let mut config = gateway_config(&gateway.url());
    config.intents = Intents::GUILDS | Intents::GUILD_MESSAGES;
    let supervisor = supervisor(config);
    let mut events = supervisor.events();

    let connect = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };

    let mut conn = gateway.accept().await;
    assert_eq!(conn.query.get("v").map(String::as_str), Some("10"));
    assert_eq!(conn.query.get("encoding").map(String::as_str), Some("json"));
    assert!(!conn.query.contains_key("compress"));

    conn.send(hello(45_000));
    let identify = conn.recv_op(OpCode::Identify).await.as_identify().unwrap();
    assert_eq!(identify.token, TEST_TOKEN);
    assert_eq!(identify.intents, Intents::GUILDS | Intents::GUILD_MESSAGES);
    assert_eq!(identify.properties.browser, "cord");
    assert!(!identify.compress);

    conn.send(ready(1, &[], None));
    connect.await.unwrap().unwrap();

    let seen = events_until(&mut events, |event| matches!(event, GatewayEvent::Ready { .. })).await;
    assert_eq!(seen[0].kind(), Some("READY"));
    assert_eq!(
        seen[1],
        GatewayEvent::Ready {
            unavailable_guilds: Vec::new()
        }
    );

    assert_eq!(supervisor.status(), SessionStatus::Ready);
    assert_eq!(supervisor.session().session_id().as_deref(), Some(SESSION_ID));

    // READY is followed by a heartbeat carrying the last sequence
    let heartbeat = conn.recv_op(OpCode::Heartbeat).await;
    assert_eq!(heartbeat.as_heartbeat_seq(), Some(Some(1)));
    conn.send(GatewayMessage::heartbeat_ack());

    supervisor.destroy();
    conn.closed().await;
}

#[tokio::test]
async fn test_ready_waits_for_guilds() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let connect = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };

    let conn = {
        let mut conn = gateway.accept().await;
        conn.send(hello(45_000));
        conn.recv_op(OpCode::Identify).await;
        conn
    };

    conn.send(ready(1, &[GUILD_ID, OTHER_GUILD_ID], None));
    conn.send(guild_create(2, GUILD_ID));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(supervisor.status(), SessionStatus::WaitingForGuilds);

    conn.send(guild_create(3, OTHER_GUILD_ID));
    connect.await.unwrap().unwrap();

    let seen = events_until(&mut events, |event| matches!(event, GatewayEvent::Ready { .. })).await;
    assert_eq!(dispatch_sequences(&seen), [1, 2, 3]);
    assert_eq!(
        seen.last(),
        Some(&GatewayEvent::Ready {
            unavailable_guilds: Vec::new()
        })
    );

    supervisor.destroy();
}

#[tokio::test]
async fn test_ready_after_grace_period_lists_missing_guilds() {
    let mut gateway = MockGateway::start().await.unwrap();
    let mut config = gateway_config(&gateway.url());
    config.ready_timeout_ms = 200;
    let supervisor = supervisor(config);
    let mut events = supervisor.events();

    let connect = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };

    let mut conn = gateway.accept().await;
    conn.send(hello(45_000));
    conn.recv_op(OpCode::Identify).await;
    conn.send(ready(1, &[GUILD_ID, OTHER_GUILD_ID], None));
    conn.send(guild_create(2, GUILD_ID));

    connect.await.unwrap().unwrap();

    let seen = events_until(&mut events, |event| matches!(event, GatewayEvent::Ready { .. })).await;
    assert_eq!(
        seen.last(),
        Some(&GatewayEvent::Ready {
            unavailable_guilds: vec![Snowflake::parse(OTHER_GUILD_ID).unwrap()]
        })
    );

    supervisor.destroy();
}

#[tokio::test]
async fn test_zlib_stream_compression() {
    let mut gateway = MockGateway::start().await.unwrap();
    let mut config = gateway_config(&gateway.url());
    config.compress = true;
    let supervisor = supervisor(config);
    let mut events = supervisor.events();

    let connect = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };

    let mut conn = gateway.accept().await;
    assert_eq!(
        conn.query.get("compress").map(String::as_str),
        Some("zlib-stream")
    );

    // Every frame after the first reuses the same deflate context
    conn.send(hello(45_000));
    let identify = conn.recv_op(OpCode::Identify).await.as_identify().unwrap();
    assert!(identify.compress);
    conn.send(ready(1, &[GUILD_ID], None));
    conn.send(guild_create(2, GUILD_ID));
    conn.send(message_create(3, "compressed"));

    connect.await.unwrap().unwrap();

    let seen = events_until(&mut events, |event| event.kind() == Some("MESSAGE_CREATE")).await;
    assert_eq!(dispatch_sequences(&seen), [1, 2, 3]);

    supervisor.destroy();
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_dispatches_before_ready_keep_their_order() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let connect = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };

    let mut conn = gateway.accept().await;
    conn.send(hello(45_000));
    conn.recv_op(OpCode::Identify).await;

    conn.send(ready(1, &[GUILD_ID], None));
    conn.send(message_create(2, "early"));
    conn.send(typing_start(3));
    conn.send(guild_create(4, GUILD_ID));
    conn.send(message_create(5, "late"));

    connect.await.unwrap().unwrap();

    let seen = events_until(&mut events, |event| {
        matches!(event, GatewayEvent::Dispatch(dispatch) if dispatch.sequence == Some(5))
    })
    .await;

    // Bootstrap events first, then the held ones in arrival order
    assert_eq!(dispatch_sequences(&seen), [1, 4, 2, 3, 5]);
    let ready_at = seen
        .iter()
        .position(|event| matches!(event, GatewayEvent::Ready { .. }))
        .unwrap();
    assert_eq!(ready_at, 2);

    supervisor.destroy();
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn test_heartbeat_timeout_resumes_session() {
    init_test_tracing();

    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let resume_url = gateway.url();
    let mut conn = connect_ready(&mut gateway, &supervisor, 150, Some(&resume_url)).await;
    conn.send(message_create(2, "before the drop"));

    // Never acknowledge: the client declares the connection dead
    conn.closed().await;

    let mut next = gateway.accept().await;
    next.send(hello(45_000));
    let resume = next.recv_op(OpCode::Resume).await.as_resume().unwrap();
    assert_eq!(resume.session_id, SESSION_ID);
    assert_eq!(resume.seq, Some(2));
    assert_eq!(resume.token, TEST_TOKEN);

    next.send(message_create(3, "replayed"));
    next.send(resumed(4));

    let seen = events_until(&mut events, |event| matches!(event, GatewayEvent::Resumed)).await;
    assert!(seen.contains(&GatewayEvent::Disconnected {
        code: CloseCode::SessionTimeout.as_u16(),
        reason: String::new()
    }));
    assert!(seen.contains(&GatewayEvent::Reconnecting));

    // The replayed event was held until RESUMED
    let after_resume = events_until(&mut events, |event| event.kind() == Some("MESSAGE_CREATE")).await;
    assert_eq!(dispatch_sequences(&after_resume), [3]);
    assert_eq!(supervisor.session().sequence(), Some(4));

    supervisor.destroy();
}

#[tokio::test]
async fn test_unacked_heartbeat_does_not_carry_into_next_socket() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let resume_url = gateway.url();
    let mut conn = connect_ready(&mut gateway, &supervisor, 150, Some(&resume_url)).await;
    conn.closed().await;

    // Hold RESUMED back so the first beat on the new socket lands first
    let mut next = gateway.accept().await;
    next.send(hello(200));
    next.recv_op(OpCode::Resume).await;

    let beat = next.recv_op(OpCode::Heartbeat).await;
    assert_eq!(beat.as_heartbeat_seq(), Some(Some(1)));
    next.send(GatewayMessage::heartbeat_ack());
    next.send(resumed(2));

    events_until(&mut events, |event| matches!(event, GatewayEvent::Resumed)).await;

    // Still the same socket one interval later
    let beat = next.recv_op(OpCode::Heartbeat).await;
    assert_eq!(beat.as_heartbeat_seq(), Some(Some(2)));
    assert_eq!(supervisor.status(), SessionStatus::Ready);

    supervisor.destroy();
}

#[tokio::test]
async fn test_abnormal_close_resumes() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let conn = connect_ready(&mut gateway, &supervisor, 45_000, None).await;
    conn.abort();

    let mut next = gateway.accept().await;
    next.send(hello(45_000));
    let resume = next.recv_op(OpCode::Resume).await.as_resume().unwrap();
    assert_eq!(resume.seq, Some(1));
    next.send(resumed(2));

    let seen = events_until(&mut events, |event| matches!(event, GatewayEvent::Resumed)).await;
    assert!(seen
        .iter()
        .any(|event| matches!(event, GatewayEvent::Disconnected { code: 1006, .. })));

    supervisor.destroy();
}

#[tokio::test]
async fn test_unresumable_close_identifies_again() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let conn = connect_ready(&mut gateway, &supervisor, 45_000, None).await;
    conn.close(CloseCode::InvalidSequence.as_u16(), "Invalid seq");

    let mut next = gateway.accept().await;
    next.send(hello(45_000));
    let frame = next
        .recv()
        .await
        .expect("client frame after reconnect");
    assert_eq!(frame.op, OpCode::Identify);
    next.send(ready(1, &[], None));

    let seen = events_until(&mut events, |event| matches!(event, GatewayEvent::Ready { .. })).await;
    assert!(seen.contains(&GatewayEvent::Disconnected {
        code: 4007,
        reason: "Invalid seq".to_string()
    }));

    supervisor.destroy();
}

#[tokio::test]
async fn test_server_requested_reconnect() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));

    let mut conn = connect_ready(&mut gateway, &supervisor, 45_000, None).await;
    conn.send(GatewayMessage::reconnect());
    conn.closed().await;

    let mut next = gateway.accept().await;
    next.send(hello(45_000));
    let resume = next.recv_op(OpCode::Resume).await.as_resume().unwrap();
    assert_eq!(resume.session_id, SESSION_ID);

    supervisor.destroy();
}

#[tokio::test]
async fn test_invalid_session_identifies_on_open_socket() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let mut conn = connect_ready(&mut gateway, &supervisor, 45_000, None).await;
    conn.send(GatewayMessage::invalid_session(false));

    let identify = conn.recv_op(OpCode::Identify).await;
    assert!(identify.as_identify().is_some());
    conn.send(ready(1, &[], None));

    let seen = events_until(&mut events, |event| matches!(event, GatewayEvent::Ready { .. })).await;
    assert!(seen.contains(&GatewayEvent::InvalidSession));
    // No new socket was needed
    assert!(gateway.try_accept(Duration::from_millis(200)).await.is_none());

    supervisor.destroy();
}

#[tokio::test]
async fn test_resumable_invalid_session_resumes() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));

    let mut conn = connect_ready(&mut gateway, &supervisor, 45_000, None).await;
    conn.send(GatewayMessage::invalid_session(true));

    let resume = conn.recv_op(OpCode::Resume).await.as_resume().unwrap();
    assert_eq!(resume.session_id, SESSION_ID);

    supervisor.destroy();
}

// ============================================================================
// Fatal closes
// ============================================================================

#[tokio::test]
async fn test_authentication_failure_is_fatal() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let conn = connect_ready(&mut gateway, &supervisor, 45_000, None).await;
    conn.close(4004, "Authentication failed.");

    let seen = events_within(&mut events, Duration::from_millis(500)).await;
    let fatal: Vec<_> = seen.iter().filter(|event| event.is_fatal()).collect();
    assert_eq!(fatal.len(), 1);
    assert!(matches!(
        fatal[0],
        GatewayEvent::Fatal {
            code: Some(4004),
            ..
        }
    ));
    assert!(!seen.contains(&GatewayEvent::Reconnecting));

    assert!(gateway.try_accept(Duration::from_millis(300)).await.is_none());
    assert!(supervisor.is_destroyed());
}

#[tokio::test]
async fn test_fatal_close_during_first_connect() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let connect = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };

    let mut conn = gateway.accept().await;
    conn.send(hello(45_000));
    conn.recv_op(OpCode::Identify).await;
    conn.close(4014, "Disallowed intent(s).");

    let result = connect.await.unwrap();
    assert!(matches!(
        result,
        Err(GatewayError::Fatal(CloseCode::DisallowedIntents))
    ));

    let seen = events_until(&mut events, GatewayEvent::is_fatal).await;
    assert!(matches!(
        seen.last(),
        Some(GatewayEvent::Fatal {
            code: Some(4014),
            ..
        })
    ));
    assert!(supervisor.is_destroyed());
    assert!(gateway.try_accept(Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn test_first_connect_failure_returned_to_caller() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));

    let connect = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };

    let conn = gateway.accept().await;
    conn.close(4000, "");

    let result = connect.await.unwrap();
    assert!(matches!(result, Err(GatewayError::Closed { code: 4000, .. })));
    // Not retried before the first ready
    assert!(gateway.try_accept(Duration::from_millis(300)).await.is_none());
    assert!(!supervisor.is_destroyed());
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_commands_reach_the_server() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));

    let mut conn = connect_ready(&mut gateway, &supervisor, 45_000, None).await;

    supervisor.update_presence(
        cord_gateway::protocol::PresenceUpdatePayload::new("dnd")
            .with_activity(json!({"name": "tests", "type": 0})),
    );
    let presence = conn.recv_op(OpCode::PresenceUpdate).await;
    assert_eq!(presence.d["status"], "dnd");

    supervisor.request_guild_members(cord_gateway::protocol::RequestGuildMembersPayload::all(
        Snowflake::parse(GUILD_ID).unwrap(),
    ));
    let request = conn.recv_op(OpCode::RequestGuildMembers).await;
    assert_eq!(request.d["guild_id"], GUILD_ID);

    supervisor.destroy();
    conn.closed().await;
}

#[tokio::test]
async fn test_destroy_closes_with_normal_code() {
    let mut gateway = MockGateway::start().await.unwrap();
    let supervisor = supervisor(gateway_config(&gateway.url()));
    let mut events = supervisor.events();

    let mut conn = connect_ready(&mut gateway, &supervisor, 45_000, None).await;
    supervisor.destroy();
    supervisor.destroy();
    conn.closed().await;

    let seen = events_within(&mut events, Duration::from_millis(300)).await;
    assert!(!seen.contains(&GatewayEvent::Reconnecting));
    assert!(gateway.try_accept(Duration::from_millis(200)).await.is_none());
    assert_eq!(supervisor.status(), SessionStatus::Disconnected);
    assert!(supervisor.session().session_id().is_none());
}
