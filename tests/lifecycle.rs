//! Integration tests for flush, drain, close and protocol tracing.

use std::time::Duration;

use natwire::{
    ClientError,
    ConnectionState,
    Event,
    RequestError,
    SubscribeOptions,
    Termination,
    WIRE_TARGET,
};
use natwire_testing::{
    LoggerHandle,
    MockServer,
    TestResult,
    builder_for,
    connected_pair,
    event_expect,
    logger,
    next_expect,
};
use rstest::rstest;
use serial_test::serial;

const WAIT: Duration = Duration::from_secs(1);

#[tokio::test]
async fn handshake_is_connect_then_ping() -> TestResult {
    let (server, client) = connected_pair().await?;
    assert_eq!(client.state(), ConnectionState::Connected);

    let ops = server.ops();
    assert!(ops[0].starts_with("CONNECT {"));
    assert_eq!(ops[1], "PING");
    assert_eq!(client.server_info().map(|info| info.server_id.clone()).as_deref(), Some("MOCK"));
    Ok(())
}

#[tokio::test]
async fn flush_resolves_after_prior_publishes() -> TestResult {
    let (server, client) = connected_pair().await?;
    for n in 0..10 {
        client.publish("ordered", n.to_string())?;
    }
    client.flush().await?;

    let ops = server.ops();
    let last_pub = ops.iter().rposition(|op| op.starts_with("PUB ordered"));
    let last_ping = ops.iter().rposition(|op| op == "PING");
    assert_eq!(ops.iter().filter(|op| op.starts_with("PUB ordered")).count(), 10);
    assert!(last_pub < last_ping);
    Ok(())
}

#[tokio::test]
async fn concurrent_flushes_all_resolve() -> TestResult {
    let (_server, client) = connected_pair().await?;
    let (a, b, c) = tokio::join!(client.flush(), client.flush(), client.flush());
    a?;
    b?;
    c?;
    Ok(())
}

#[tokio::test]
async fn drain_delivers_buffered_messages_then_closes() -> TestResult {
    let (server, client) = connected_pair().await?;
    let mut sub = client.subscribe("work")?;
    client.flush().await?;
    for n in 0..3 {
        client.publish("work", n.to_string())?;
    }
    client.flush().await?;

    client.drain().await?;
    assert_eq!(client.state(), ConnectionState::Closed);
    for n in 0..3 {
        assert_eq!(next_expect!(sub).payload, n.to_string());
    }
    assert!(sub.next_message().await.is_none());
    assert_eq!(sub.termination(), Some(Termination::Drained));
    assert!(server.ops().contains(&"UNSUB 1".to_owned()));
    Ok(())
}

#[tokio::test]
async fn draining_refuses_new_interest() -> TestResult {
    let (server, client) = connected_pair().await?;
    let _sub = client.subscribe("busy")?;
    client.flush().await?;

    server.answer_pings(false);
    let draining = tokio::spawn({
        let client = client.clone();
        async move { client.drain().await }
    });
    tokio::time::timeout(WAIT, async {
        while client.state() != ConnectionState::Draining {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    assert!(matches!(client.subscribe("more"), Err(ClientError::Draining)));
    assert!(matches!(
        client.request("svc", "x").await,
        Err(RequestError::Rejected(_))
    ));
    assert!(matches!(client.drain().await, Err(ClientError::Draining)));
    client.publish("still.allowed", "x")?;

    server.inject("PONG\r\n");
    tokio::time::timeout(WAIT, draining).await???;
    assert_eq!(client.state(), ConnectionState::Closed);
    Ok(())
}

#[tokio::test]
async fn close_ends_subscriptions_and_is_idempotent() -> TestResult {
    let (_server, client) = connected_pair().await?;
    let mut events = client.events();
    let mut sub = client.subscribe("bye")?;

    client.close().await?;
    client.close().await?;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(sub.next_message().await.is_none());
    assert_eq!(sub.termination(), Some(Termination::Closed));
    let closed = event_expect!(events, Event::Closed { .. });
    assert!(matches!(closed, Event::Closed { reason: None }));
    assert!(matches!(client.flush().await, Err(ClientError::Closed)));
    Ok(())
}

#[tokio::test]
async fn dropping_every_handle_closes_the_connection() -> TestResult {
    let (server, client) = connected_pair().await?;
    assert!(server.wait_for_connections(1, WAIT).await);
    drop(client);

    tokio::time::timeout(WAIT, async {
        while server.connections() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn slow_consumer_drops_and_reports() -> TestResult {
    let (_server, client) = connected_pair().await?;
    let mut events = client.events();
    let _sub = client.subscribe_with("flood", SubscribeOptions::default().capacity(1))?;
    client.flush().await?;

    for n in 0..3 {
        client.publish("flood", n.to_string())?;
    }
    event_expect!(events, Event::SlowConsumer { .. });
    Ok(())
}

#[rstest]
#[tokio::test]
#[serial]
async fn debug_mode_echoes_frames(mut logger: LoggerHandle) -> TestResult {
    let server = MockServer::start().await?;
    let client = builder_for(&server).debug(true).connect().await?;
    client.publish("echoed", "abc")?;
    client.flush().await?;
    client.close().await?;

    let lines = logger.messages_for(WIRE_TARGET);
    assert!(lines.iter().any(|line| line.starts_with("<< INFO {")));
    assert!(lines.iter().any(|line| line.starts_with(">> CONNECT {")));
    assert!(lines.iter().any(|line| line == ">> PUB echoed 3"));
    assert!(lines.iter().any(|line| line == "<< PONG"));
    Ok(())
}

#[rstest]
#[tokio::test]
#[serial]
async fn frames_are_quiet_without_debug(mut logger: LoggerHandle) -> TestResult {
    let (_server, client) = connected_pair().await?;
    client.publish("quiet", "abc")?;
    client.flush().await?;

    assert!(logger.messages_for(WIRE_TARGET).is_empty());
    Ok(())
}
