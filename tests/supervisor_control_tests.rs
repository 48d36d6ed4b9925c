use std::fs;
use std::io::Read;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bmi_rig::config::RigConfig;
use bmi_rig::core::RigError;
use bmi_rig::engine::WaitStrategy;
use bmi_rig::supervisor::{
    mailbox, spawn_host, AckKind, Component, ControlClient, HarnessHost, Host, ImagingHost,
    ReceiverHost, Reply, ReplyHandle, Request, SharedState,
};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

type Log = Arc<Mutex<Vec<(Component, Request)>>>;

/// Answers every request with `answer` and records what it saw.
struct ScriptedHost {
    component: Component,
    log: Log,
    answer: fn(&Request) -> Reply,
}

#[async_trait]
impl Host for ScriptedHost {
    fn component(&self) -> Component {
        self.component
    }

    async fn handle(&mut self, request: Request, reply: ReplyHandle) {
        let answer = (self.answer)(&request);
        self.log.lock().unwrap().push((self.component, request));
        reply.send(answer);
    }
}

fn ack_all(request: &Request) -> Reply {
    Reply::ack(request.expected_ack())
}

fn scripted_client(
    answer: fn(&Request) -> Reply,
    warmup: Duration,
) -> (ControlClient, Log, SharedState) {
    let state = SharedState::new();
    let log: Log = Arc::default();
    let spawn = |component| {
        spawn_host(
            ScriptedHost {
                component,
                log: log.clone(),
                answer,
            },
            state.clone(),
        )
        .0
    };
    let harness = spawn(Component::Harness);
    let imaging = spawn(Component::Imaging);
    let receiver = spawn(Component::Receiver);
    (
        ControlClient::new(harness, imaging, receiver, state.clone(), warmup),
        log,
        state,
    )
}

#[tokio::test]
async fn test_busy_host_is_refused_before_sending() {
    let state = SharedState::new();
    let (harness, mut harness_rx) = mailbox(Component::Harness);
    let (imaging, mut imaging_rx) = mailbox(Component::Imaging);
    let (receiver, _receiver_rx) = mailbox(Component::Receiver);
    let client = ControlClient::new(harness, imaging, receiver, state.clone(), Duration::ZERO);

    state.set_busy(Component::Harness, true);
    let err = assert_err!(client.load_pipeline("decoder.json").await);
    assert!(matches!(err, RigError::Busy(Component::Harness)));

    let err = assert_err!(client.run_session(Duration::from_secs(1)).await);
    assert!(matches!(err, RigError::Busy(Component::Harness)));

    assert!(harness_rx.try_recv().is_err());
    assert!(imaging_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_connects_are_sequenced() {
    let (client, log, _) = scripted_client(ack_all, Duration::ZERO);

    assert_ok!(client.connect_command_sink("127.0.0.1:9000").await);
    assert_ok!(client.connect_frame_source(2).await);

    let seen: Vec<Component> = log.lock().unwrap().iter().map(|(c, _)| *c).collect();
    assert_eq!(
        seen,
        vec![
            Component::Receiver,
            Component::Harness,
            Component::Imaging,
            Component::Harness
        ]
    );
}

#[tokio::test]
async fn test_acquisition_covers_warmup() {
    let warmup = Duration::from_millis(20);
    let (client, log, _) = scripted_client(ack_all, warmup);

    assert_ok!(client.run_session(Duration::from_millis(500)).await);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    match &log[0] {
        (Component::Imaging, Request::RunSession { duration_s }) => {
            assert!((duration_s - 0.52).abs() < 1e-9)
        }
        other => panic!("unexpected first request {:?}", other),
    }
    match &log[1] {
        (Component::Harness, Request::RunSession { duration_s }) => {
            assert!((duration_s - 0.5).abs() < 1e-9)
        }
        other => panic!("unexpected second request {:?}", other),
    }
}

#[tokio::test]
async fn test_mismatched_ack_is_protocol_error() {
    let (client, _, _) = scripted_client(|_| Reply::ack(AckKind::LoadPipeline), Duration::ZERO);

    let err = assert_err!(client.test_command_sink(3).await);
    match err {
        RigError::Protocol { expected, .. } => assert_eq!(expected, AckKind::TestCommandSink),
        other => panic!("expected protocol error, got {}", other),
    }
}

#[tokio::test]
async fn test_rejection_is_reported_with_reason() {
    let (client, _, _) = scripted_client(
        |request| Reply::rejected(request.expected_ack(), "no such file"),
        Duration::ZERO,
    );

    let err = assert_err!(client.load_pipeline("missing.json").await);
    match err {
        RigError::Rejected {
            component,
            kind,
            reason,
        } => {
            assert_eq!(component, Component::Harness);
            assert_eq!(kind, AckKind::LoadPipeline);
            assert_eq!(reason, "no such file");
        }
        other => panic!("expected rejection, got {}", other),
    }
}

#[tokio::test]
async fn test_second_connect_is_refused_locally() {
    let (client, log, state) = scripted_client(ack_all, Duration::ZERO);
    state.update(|s| s.actuator_connected = true);

    let err = assert_err!(client.connect_command_sink("127.0.0.1:9000").await);
    assert!(matches!(
        err,
        RigError::Rejected {
            kind: AckKind::ConnectCommandSink,
            ..
        }
    ));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_actuator_connect_retry_after_refused_port() {
    let pid = std::process::id();
    let mut config = RigConfig {
        output_dir: None,
        ..RigConfig::default()
    };
    config.frame_region.name = format!("bmi-rig-test-retry-frames-{}", pid);
    config.receiver.bind_addr = "127.0.0.1:0".to_string();
    config.receiver.region = format!("bmi-rig-test-retry-receiver-{}", pid);

    // Nothing listens here once the listener is dropped.
    let refused_addr = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let actuator = TcpListener::bind("127.0.0.1:0").unwrap();
    let live_addr = actuator.local_addr().unwrap();

    let state = SharedState::new();
    let (harness, harness_task) =
        spawn_host(HarnessHost::new(config.clone(), state.clone()).unwrap(), state.clone());
    let (imaging, imaging_task) = spawn_host(
        ScriptedHost {
            component: Component::Imaging,
            log: Log::default(),
            answer: ack_all,
        },
        state.clone(),
    );
    let (receiver, receiver_task) =
        spawn_host(ReceiverHost::new(config.receiver.clone()), state.clone());
    let client = ControlClient::new(harness, imaging, receiver, state.clone(), Duration::ZERO);

    let err = assert_err!(client.connect_command_sink(&refused_addr.to_string()).await);
    assert!(matches!(
        err,
        RigError::Rejected {
            component: Component::Harness,
            kind: AckKind::ConnectCommandSink,
            ..
        }
    ));
    assert!(!client.state().actuator_connected);

    // The receiver stayed up from the first attempt; the retry reuses it.
    assert_ok!(client.connect_command_sink(&live_addr.to_string()).await);
    assert!(client.state().actuator_connected);
    assert!(actuator.accept().is_ok());

    drop(client);
    for task in [harness_task, imaging_task, receiver_task] {
        assert_ok!(task.await);
    }
    assert!(!state.snapshot().actuator_connected);
}

#[tokio::test]
async fn test_closed_loop_session_end_to_end() {
    let dir = TempDir::new().unwrap();
    let pid = std::process::id();
    let pipeline_dir = dir.path().join("pipelines");
    fs::create_dir_all(&pipeline_dir).unwrap();
    fs::write(
        pipeline_dir.join("decoder.json"),
        r#"{"stages": [{"stage": "Flatten"}, {"stage": "Mean"}]}"#,
    )
    .unwrap();

    let mut config = RigConfig {
        tick_rate_hz: 50.0,
        wait_strategy: WaitStrategy::Blocking,
        pipeline_dir,
        output_dir: None,
        imaging_warmup_s: 0.05,
        synthetic_frame_rate_hz: 50.0,
        ..RigConfig::default()
    };
    config.frame_region.name = format!("bmi-rig-test-e2e-frames-{}", pid);
    config.frame_region.rows = 8;
    config.frame_region.cols = 8;
    config.receiver.bind_addr = "127.0.0.1:0".to_string();
    config.receiver.region = format!("bmi-rig-test-e2e-receiver-{}", pid);

    let actuator = TcpListener::bind("127.0.0.1:0").unwrap();
    let actuator_addr = actuator.local_addr().unwrap();
    let counter = thread::spawn(move || {
        let (mut stream, _) = actuator.accept().unwrap();
        let mut buf = [0u8; 8];
        let mut commands = 0usize;
        while stream.read_exact(&mut buf).is_ok() {
            commands += 1;
        }
        commands
    });

    let state = SharedState::new();
    let (harness, harness_task) =
        spawn_host(HarnessHost::new(config.clone(), state.clone()).unwrap(), state.clone());
    let (imaging, imaging_task) =
        spawn_host(ImagingHost::new(&config, state.clone()), state.clone());
    let (receiver, receiver_task) =
        spawn_host(ReceiverHost::new(config.receiver.clone()), state.clone());
    let client = ControlClient::new(
        harness,
        imaging,
        receiver,
        state.clone(),
        config.imaging_warmup(),
    );

    assert_ok!(client.connect_frame_source(0).await);
    assert_ok!(client.connect_command_sink(&actuator_addr.to_string()).await);
    assert_ok!(client.load_pipeline("decoder.json").await);
    assert_ok!(client.test_command_sink(2).await);
    assert_ok!(client.run_session(Duration::from_millis(300)).await);

    let snapshot = client.state();
    assert!(snapshot.actuator_connected);
    assert!(snapshot.imaging_connected);
    assert_eq!(snapshot.pipeline.as_deref(), Some("decoder.json"));

    let err = assert_err!(client.connect_frame_source(0).await);
    assert!(matches!(err, RigError::Rejected { .. }));

    drop(client);
    for task in [harness_task, imaging_task, receiver_task] {
        assert_ok!(task.await);
    }

    // Two test packets plus one command per tick.
    let commands = counter.join().unwrap();
    assert!(commands > 2, "actuator saw {} commands", commands);
    assert!(!state.snapshot().actuator_connected);
}
