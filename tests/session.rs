//! End-to-end tests for capture sessions and the receive relay.
//!
//! Everything runs over loopback with scripted or synthetic capture, so no
//! audio hardware is needed.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use lan_mic_relay::{
    audio::{
        BufferIntake, CaptureBackend, CaptureStage, RecordControl, RecordState, SyntheticBackend,
    },
    config::{Destination, RelayConfig, SessionConfig, SinkConfig},
    error::{AudioError, DriverError},
    network::ReceiveRelay,
    sink::LocalSink,
    CaptureSession, Error,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlEvent {
    State(RecordState),
    Clear,
}

struct ScriptedIntake {
    refuse: bool,
}

impl BufferIntake for ScriptedIntake {
    fn enqueue(&mut self, _index: usize) -> Result<(), DriverError> {
        if self.refuse {
            Err(DriverError::Enqueue("device busy".into()))
        } else {
            Ok(())
        }
    }
}

struct ScriptedControl(Sender<ControlEvent>);

impl RecordControl for ScriptedControl {
    fn set_record_state(&mut self, state: RecordState) -> Result<(), DriverError> {
        let _ = self.0.send(ControlEvent::State(state));
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DriverError> {
        let _ = self.0.send(ControlEvent::Clear);
        Ok(())
    }
}

/// Hands the capture stage to the test, which plays the driver's part.
struct ScriptedBackend {
    refuse_submissions: bool,
    fail_open: bool,
    stages: Sender<CaptureStage<ScriptedIntake>>,
    events: Sender<ControlEvent>,
}

impl CaptureBackend for ScriptedBackend {
    type Intake = ScriptedIntake;
    type Control = ScriptedControl;

    fn open(
        &mut self,
        _config: &SessionConfig,
    ) -> Result<(ScriptedIntake, ScriptedControl), AudioError> {
        if self.fail_open {
            return Err(AudioError::DeviceNotFound("scripted".into()));
        }
        Ok((
            ScriptedIntake {
                refuse: self.refuse_submissions,
            },
            ScriptedControl(self.events.clone()),
        ))
    }

    fn attach(
        &mut self,
        stage: CaptureStage<ScriptedIntake>,
        _control: &mut ScriptedControl,
    ) -> Result<(), AudioError> {
        self.stages
            .send(stage)
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }
}

fn scripted() -> (
    ScriptedBackend,
    Receiver<CaptureStage<ScriptedIntake>>,
    Receiver<ControlEvent>,
) {
    let (stages_tx, stages_rx) = unbounded();
    let (events_tx, events_rx) = unbounded();
    let backend = ScriptedBackend {
        refuse_submissions: false,
        fail_open: false,
        stages: stages_tx,
        events: events_tx,
    };
    (backend, stages_rx, events_rx)
}

fn loopback_config(destination: Destination) -> SessionConfig {
    SessionConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        destination,
        ..Default::default()
    }
}

fn client_socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    socket
}

fn recv(socket: &UdpSocket) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; 2048];
    let (len, _) = socket.recv_from(&mut buf)?;
    Ok(buf[..len].to_vec())
}

#[test]
fn test_discovered_client_receives_buffers_in_order() {
    let (mut backend, stages, events) = scripted();
    let mut session =
        CaptureSession::start(&loopback_config(Destination::Discovery), &mut backend).unwrap();
    let mut stage = stages.try_recv().unwrap();

    let client = client_socket();
    client.send_to(&[], session.local_addr()).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    for marker in 1..=3u8 {
        stage.filling_mut().unwrap().fill(marker);
        stage.complete();
    }

    for marker in 1..=3u8 {
        let datagram = recv(&client).unwrap();
        assert_eq!(datagram.len(), 640);
        assert!(datagram.iter().all(|&b| b == marker));
    }

    assert!(session.is_running());
    session.stop().unwrap();
    assert!(!session.is_running());

    let stats = session.stats();
    assert_eq!(stats.buffers_captured, 3);
    assert_eq!(stats.buffers_sent, 3);
    assert_eq!(stats.bytes_sent, 1920);

    assert_eq!(
        events.try_iter().collect::<Vec<_>>(),
        vec![
            ControlEvent::State(RecordState::Recording),
            ControlEvent::State(RecordState::Stopped),
            ControlEvent::Clear,
        ]
    );
}

#[test]
fn test_broadcast_destination_needs_no_probe() {
    let client = client_socket();
    let (mut backend, stages, _events) = scripted();
    let config = loopback_config(Destination::Broadcast {
        address: client.local_addr().unwrap(),
    });
    let mut session = CaptureSession::start(&config, &mut backend).unwrap();
    let mut stage = stages.try_recv().unwrap();

    stage.write_samples((0..320).map(|i| i as i16));

    let datagram = recv(&client).unwrap();
    assert_eq!(datagram.len(), 640);
    assert_eq!(&datagram[..6], &[0, 0, 1, 0, 2, 0]);

    session.stop().unwrap();
}

#[test]
fn test_refused_kickstart_releases_driver() {
    let (mut backend, stages, events) = scripted();
    backend.refuse_submissions = true;

    let result = CaptureSession::start(&loopback_config(Destination::Discovery), &mut backend);

    assert!(matches!(
        result,
        Err(Error::Audio(AudioError::Driver(DriverError::Enqueue(_))))
    ));
    assert!(stages.try_recv().is_err());
    assert_eq!(
        events.try_iter().collect::<Vec<_>>(),
        vec![ControlEvent::State(RecordState::Stopped), ControlEvent::Clear]
    );
}

#[test]
fn test_open_failure_is_reported() {
    let (mut backend, _stages, events) = scripted();
    backend.fail_open = true;

    let result = CaptureSession::start(&loopback_config(Destination::Discovery), &mut backend);

    assert!(matches!(result, Err(Error::Audio(AudioError::DeviceNotFound(_)))));
    assert!(events.try_recv().is_err());
}

#[test]
fn test_stop_is_idempotent() {
    let (mut backend, _stages, events) = scripted();
    let mut session =
        CaptureSession::start(&loopback_config(Destination::Discovery), &mut backend).unwrap();

    session.stop().unwrap();
    session.stop().unwrap();
    drop(session);

    let stops = events
        .try_iter()
        .filter(|e| *e == ControlEvent::State(RecordState::Stopped))
        .count();
    assert_eq!(stops, 1);
}

struct ChannelSink(mpsc::UnboundedSender<Vec<u8>>);

impl LocalSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .send(data.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(data.len())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_relay_heartbeat_discovers_synthetic_sender() {
    let session_config = SessionConfig {
        frames_per_buffer: 160,
        ..loopback_config(Destination::Discovery)
    };
    let mut session =
        CaptureSession::start(&session_config, &mut SyntheticBackend::default()).unwrap();
    let sender_addr: SocketAddr = session.local_addr();

    let relay_config = RelayConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        heartbeat_target: sender_addr,
        buffer_size: session_config.buffer_size(),
        timeout_ms: 50,
        sink: SinkConfig::Stdout,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut relay = ReceiveRelay::bind(&relay_config, ChannelSink(tx)).unwrap();
    let relay_task = tokio::spawn(async move {
        relay
            .run(tokio::time::sleep(Duration::from_millis(500)))
            .await
            .map(|_| relay.stats().clone())
    });

    for _ in 0..5 {
        let datagram = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(datagram.len(), 320);
    }

    let relay_stats = relay_task.await.unwrap().unwrap();
    assert!(relay_stats.heartbeats >= 1);
    assert!(relay_stats.datagrams >= 5);

    session.stop().unwrap();
    assert!(session.stats().buffers_sent >= 5);
}
