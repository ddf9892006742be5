//! End-to-end session behavior against a scripted transcoder

mod common;

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio_test::assert_ok;

use common::{eventually, Counters, Script, ScriptedTranscoder};
use rtsp_ws_relay::{
    CloseReason, FfmpegTranscoder, ManagerConfig, RetryPolicy, SessionConfig, SessionError,
    SessionEvent, SessionManager, SessionState, ViewerMessage, ViewerReceiver, ViewerSink,
};

const SOURCE: &str = "rtsp://127.0.0.1:554/camera";

fn stream_config(name: &str) -> SessionConfig {
    SessionConfig::new(name, SOURCE)
        .jsmpeg_greeting(false)
        .stop_timeout(Duration::from_secs(1))
        .retry(
            RetryPolicy::default()
                .max_restarts(3)
                .backoff(Duration::from_millis(10), Duration::from_millis(40)),
        )
}

async fn manager_with(
    script: Script,
    config: SessionConfig,
) -> (std::sync::Arc<SessionManager<ScriptedTranscoder>>, Counters) {
    let (transcoder, counters) = ScriptedTranscoder::new(script);
    let manager = SessionManager::new(transcoder, ManagerConfig::default());
    manager.register_stream(config).await;
    (manager, counters)
}

async fn next_closed(rx: &mut ViewerReceiver) -> CloseReason {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Some(ViewerMessage::Closed(reason)) => return reason,
                Some(ViewerMessage::Chunk(_)) => continue,
                None => panic!("viewer queue ended without a close"),
            }
        }
    })
    .await
    .expect("viewer was not closed")
}

async fn collect_until_permanent(
    events: &mut broadcast::Receiver<SessionEvent>,
) -> Vec<SessionEvent> {
    tokio::time::timeout(Duration::from_secs(3), async {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.expect("event channel closed");
            let done = matches!(event, SessionEvent::PermanentFailure { .. });
            seen.push(event);
            if done {
                return seen;
            }
        }
    })
    .await
    .expect("session never failed permanently")
}

#[tokio::test]
async fn test_process_runs_only_while_viewers_present() {
    let (manager, counters) = manager_with(Script::Stream, stream_config("cam")).await;
    assert_eq!(counters.running(), 0);

    let (sink_a, _rx_a) = ViewerSink::channel(256);
    let a = manager.subscribe("cam", sink_a, None).await.unwrap();
    assert!(eventually(|| counters.running() == 1).await);

    let mut status = manager.watch_status("cam").await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.state == SessionState::Streaming),
    )
    .await
    .unwrap()
    .unwrap();

    // A second viewer shares the running process
    let (sink_b, _rx_b) = ViewerSink::channel(256);
    let b = manager.subscribe("cam", sink_b, None).await.unwrap();
    assert!(manager.unsubscribe("cam", a.id).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counters.running(), 1);
    assert_eq!(counters.spawns(), 1);

    assert!(manager.unsubscribe("cam", b.id).await);
    assert!(eventually(|| counters.running() == 0).await);
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.state == SessionState::Idle),
    )
    .await
    .unwrap()
    .unwrap();

    // Rejoining starts a fresh process
    let (sink_c, _rx_c) = ViewerSink::channel(256);
    manager.subscribe("cam", sink_c, None).await.unwrap();
    assert!(eventually(|| counters.running() == 1).await);
    assert_eq!(counters.spawns(), 2);

    manager.shutdown().await;
    assert!(eventually(|| counters.running() == 0).await);
}

#[tokio::test]
async fn test_last_unsubscribe_stops_process_promptly() {
    let (manager, counters) = manager_with(Script::Stream, stream_config("cam")).await;

    let (sink, _rx) = ViewerSink::channel(256);
    let viewer = manager.subscribe("cam", sink, None).await.unwrap();
    assert!(eventually(|| counters.running() == 1).await);

    let started = Instant::now();
    manager.unsubscribe("cam", viewer.id).await;
    assert!(eventually(|| counters.running() == 0).await);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_invalid_source_fails_without_streaming() {
    let manager = SessionManager::new(FfmpegTranscoder::default(), ManagerConfig::default());
    manager
        .register_stream(SessionConfig::new("bad", "definitely not a url"))
        .await;
    let mut events = manager.subscribe_events();

    let (sink, mut rx) = ViewerSink::channel(16);
    manager.subscribe("bad", sink, None).await.unwrap();

    let seen = collect_until_permanent(&mut events).await;
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::SpawnFailed { .. })));
    assert!(!seen.iter().any(|e| matches!(
        e,
        SessionEvent::StateChanged {
            state: SessionState::Streaming,
            ..
        }
    )));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::ProcessStarted { .. })));

    assert!(matches!(next_closed(&mut rx).await, CloseReason::Failed(_)));

    let status = manager.status("bad").await.unwrap();
    assert!(status.is_terminal());

    let (sink, _rx) = ViewerSink::channel(16);
    let err = manager.subscribe("bad", sink, None).await.unwrap_err();
    assert!(matches!(err, SessionError::StreamFailed { .. }));
}

#[tokio::test]
async fn test_slow_viewer_does_not_block_others() {
    let (manager, _counters) = manager_with(Script::Stream, stream_config("cam")).await;

    // Never read from the slow viewer's queue
    let (slow_sink, _slow_rx) = ViewerSink::channel(1);
    let slow = manager.subscribe("cam", slow_sink, None).await.unwrap();

    let (fast_sink, mut fast_rx) = ViewerSink::channel(256);
    manager.subscribe("cam", fast_sink, None).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), async {
        let mut received = 0;
        while received < 20 {
            if let Some(ViewerMessage::Chunk(_)) = fast_rx.recv().await {
                received += 1;
            }
        }
        received
    })
    .await
    .expect("fast viewer stalled");

    assert_eq!(received, 20);
    assert!(slow.dropped() > 0);
    assert_eq!(manager.registry().viewer_count("cam").await, 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_crash_retry_then_terminal_failure() {
    let (manager, counters) = manager_with(Script::CrashAfter(0), stream_config("cam")).await;
    let mut events = manager.subscribe_events();

    let (sink, mut rx) = ViewerSink::channel(16);
    manager.subscribe("cam", sink, None).await.unwrap();

    let seen = collect_until_permanent(&mut events).await;

    let attempts: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ProcessStarted { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![0, 1, 2, 3]);

    let retries = seen
        .iter()
        .filter(|e| {
            matches!(
                e,
                SessionEvent::ProcessFailed {
                    restart_in: Some(_),
                    ..
                }
            )
        })
        .count();
    assert_eq!(retries, 3);
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::ProcessFailed {
            restart_in: None,
            ..
        }
    )));

    assert_eq!(counters.spawns(), 4);
    assert!(matches!(next_closed(&mut rx).await, CloseReason::Failed(_)));

    let status = manager.status("cam").await.unwrap();
    assert!(status.is_terminal());
    assert_eq!(status.restarts, 3);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("exited with code 1")));
}

#[tokio::test]
async fn test_silent_transcoder_times_out() {
    let config = stream_config("cam")
        .ready_timeout(Duration::from_millis(50))
        .retry(RetryPolicy::default().max_restarts(0));
    let (manager, counters) = manager_with(Script::Silent, config).await;
    let mut events = manager.subscribe_events();

    let (sink, _rx) = ViewerSink::channel(16);
    manager.subscribe("cam", sink, None).await.unwrap();

    let seen = collect_until_permanent(&mut events).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::PermanentFailure { error, .. } if error.contains("no output")
    )));
    assert_eq!(counters.spawns(), 1);
    assert!(eventually(|| counters.running() == 0).await);
}

#[tokio::test]
async fn test_stop_closes_viewers_and_allows_restart() {
    let (manager, counters) = manager_with(Script::Stream, stream_config("cam")).await;

    let (sink, mut rx) = ViewerSink::channel(1024);
    manager.subscribe("cam", sink, None).await.unwrap();
    assert!(eventually(|| counters.running() == 1).await);

    assert_ok!(manager.stop_session("cam").await);
    assert_eq!(next_closed(&mut rx).await, CloseReason::Stopped);
    assert!(eventually(|| counters.running() == 0).await);
    assert_eq!(manager.registry().viewer_count("cam").await, 0);
    assert_eq!(
        manager.status("cam").await.unwrap().state,
        SessionState::Idle
    );

    let (sink, _rx) = ViewerSink::channel(1024);
    manager.subscribe("cam", sink, None).await.unwrap();
    assert!(eventually(|| counters.running() == 1).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_greeting_sent_before_video() {
    let config = SessionConfig::new("cam", SOURCE);
    let (manager, _counters) = manager_with(Script::Stream, config).await;

    let (sink, mut rx) = ViewerSink::channel(256);
    manager.subscribe("cam", sink, None).await.unwrap();

    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(ViewerMessage::Chunk(first))) => {
            assert_eq!(&first[..], &rtsp_ws_relay::jsmpeg_header(640, 480)[..]);
        }
        other => panic!("unexpected first message: {:?}", other),
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn test_output_failure_counts_as_crash() {
    let config = stream_config("cam").retry(
        RetryPolicy::default()
            .max_restarts(1)
            .backoff(Duration::from_millis(10), Duration::from_millis(10)),
    );
    let (manager, counters) = manager_with(Script::BrokenOutput, config).await;
    let mut events = manager.subscribe_events();

    let (sink, mut rx) = ViewerSink::channel(64);
    manager.subscribe("cam", sink, None).await.unwrap();

    let seen = collect_until_permanent(&mut events).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::ProcessFailed { error, restart_in: Some(_), .. }
            if error.contains("broken pipe")
    )));

    assert_eq!(counters.spawns(), 2);
    assert!(eventually(|| counters.running() == 0).await);
    match next_closed(&mut rx).await {
        CloseReason::Failed(reason) => assert!(reason.contains("broken pipe")),
        other => panic!("unexpected close: {:?}", other),
    }
}

#[tokio::test]
async fn test_stable_run_resets_restart_count() {
    // Every process streams past reset_after before crashing, so the
    // single allowed restart is never used up
    let config = stream_config("cam").retry(
        RetryPolicy::default()
            .max_restarts(1)
            .backoff(Duration::from_millis(5), Duration::from_millis(5))
            .reset_after(Duration::from_millis(20)),
    );
    let (manager, counters) =
        manager_with(Script::CrashAfterRunning(Duration::from_millis(150)), config).await;
    let mut events = manager.subscribe_events();

    let (sink, _rx) = ViewerSink::channel(1024);
    manager.subscribe("cam", sink, None).await.unwrap();

    let attempts = tokio::time::timeout(Duration::from_secs(3), async {
        let mut attempts = Vec::new();
        while attempts.len() < 4 {
            match events.recv().await {
                Ok(SessionEvent::ProcessStarted { attempt, .. }) => attempts.push(attempt),
                Ok(SessionEvent::PermanentFailure { error, .. }) => {
                    panic!("session gave up: {}", error)
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
        attempts
    })
    .await
    .expect("transcoder was not restarted repeatedly");

    assert_eq!(attempts, vec![0, 1, 1, 1]);
    assert!(counters.spawns() >= 4);
    assert!(!manager.status("cam").await.unwrap().is_terminal());

    manager.shutdown().await;
}
