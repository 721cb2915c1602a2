//! Stand-ins for the far end of a connection.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use testwire_protocol::transport::FrameReader;
use testwire_protocol::{InfoPayload, is_terminal_payload, payload_type};

use crate::runner::RunnerListener;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `condition` every 10 ms for up to two seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Raw-socket runner that speaks the wire format by hand.
pub struct FakeRunner {
    listener: TcpListener,
    writer: Option<TcpStream>,
    reader: Option<FrameReader<TcpStream>>,
}

impl FakeRunner {
    pub fn bind() -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind fake runner");
        Self {
            listener,
            writer: None,
            reader: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().expect("fake runner address").port()
    }

    /// Accepts the execution engine's connection.
    pub fn accept(&mut self) {
        let (stream, _) = self.listener.accept().expect("accept execution engine");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        let reader = stream.try_clone().expect("clone stream");
        self.reader = Some(FrameReader::new(reader));
        self.writer = Some(stream);
    }

    /// Writes `line` followed by the end-of-message byte.
    pub fn send(&mut self, line: &str) {
        let writer = self.writer.as_mut().expect("runner is not connected");
        writer.write_all(line.as_bytes()).expect("write frame");
        writer.write_all(b"\n").expect("write terminator");
        writer.flush().expect("flush frame");
    }

    /// Reads the next frame as text, failing the test after five seconds.
    pub fn next_frame(&mut self) -> String {
        let reader = self.reader.as_mut().expect("runner is not connected");
        let frame = reader
            .next_frame()
            .expect("read frame")
            .expect("connection closed before a frame arrived");
        String::from_utf8(frame).expect("frame is UTF-8")
    }

    /// Reads frames until one satisfies `done`, returning all of them.
    pub fn frames_until(&mut self, mut done: impl FnMut(&str) -> bool) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            let frame = self.next_frame();
            let finished = done(&frame);
            frames.push(frame);
            if finished {
                return frames;
            }
        }
    }

    /// Reads `MSG` frames until every operation in `operation_ids` has sent
    /// its terminal event. Returns the payload types seen per operation;
    /// frames for other operations are dropped.
    pub fn events_until_complete(&mut self, operation_ids: &[&str]) -> BTreeMap<String, Vec<String>> {
        let mut events: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut open: BTreeSet<&str> = operation_ids.iter().copied().collect();
        while !open.is_empty() {
            let frame = self.next_frame();
            let Some(data) = frame.strip_prefix("MSG ") else {
                continue;
            };
            let Some((operation_id, payload)) = data.split_once(' ') else {
                continue;
            };
            if !open.contains(operation_id) {
                continue;
            }
            let kind = payload_type(payload.as_bytes()).expect("payload carries a type");
            if is_terminal_payload(payload.as_bytes()) {
                open.remove(operation_id);
            }
            events.entry(operation_id.to_owned()).or_default().push(kind);
        }
        events
    }

    /// Asserts that nothing arrives within `window`.
    pub fn expect_silence(&mut self, window: Duration) {
        let writer = self.writer.as_ref().expect("runner is not connected");
        writer
            .set_read_timeout(Some(window))
            .expect("shorten read timeout");
        let reader = self.reader.as_mut().expect("runner is not connected");
        match reader.next_frame() {
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) => {}
            other => panic!("expected no frame, got {other:?}"),
        }
        writer
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("restore read timeout");
    }

    /// Reads until the engine closes the connection.
    pub fn expect_closed(&mut self) {
        let reader = self.reader.as_mut().expect("runner is not connected");
        while let Some(_frame) = reader.next_frame().expect("read until close") {}
    }

    /// Drops the connection from the runner side.
    pub fn hang_up(&mut self) {
        self.reader = None;
        if let Some(stream) = self.writer.take() {
            stream
                .shutdown(std::net::Shutdown::Both)
                .expect("shut down fake runner stream");
        }
    }
}

/// [`RunnerListener`] that records everything it is told.
#[derive(Debug, Default)]
pub struct RecordingListener {
    info: Mutex<Option<InfoPayload>>,
    messages: Mutex<Vec<(String, String)>>,
    completed: Mutex<Vec<String>>,
    disconnected: Mutex<bool>,
}

impl RecordingListener {
    pub fn info(&self) -> Option<InfoPayload> {
        self.info.lock().expect("listener mutex").clone()
    }

    /// Payload types received for `operation_id`, in order.
    pub fn kinds_for(&self, operation_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .expect("listener mutex")
            .iter()
            .filter(|(id, _)| id == operation_id)
            .filter_map(|(_, payload)| payload_type(payload.as_bytes()))
            .collect()
    }

    /// Raw payloads received for `operation_id`, in order.
    pub fn payloads_for(&self, operation_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .expect("listener mutex")
            .iter()
            .filter(|(id, _)| id == operation_id)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().expect("listener mutex").clone()
    }

    pub fn is_completed(&self, operation_id: &str) -> bool {
        self.completed().iter().any(|id| id == operation_id)
    }

    pub fn disconnected(&self) -> bool {
        *self.disconnected.lock().expect("listener mutex")
    }
}

impl RunnerListener for RecordingListener {
    fn on_info(&self, info: &InfoPayload) {
        *self.info.lock().expect("listener mutex") = Some(info.clone());
    }

    fn on_message(&self, operation_id: &str, payload: &[u8]) {
        self.messages.lock().expect("listener mutex").push((
            operation_id.to_owned(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
    }

    fn on_operation_complete(&self, operation_id: &str) {
        self.completed
            .lock()
            .expect("listener mutex")
            .push(operation_id.to_owned());
    }

    fn on_disconnected(&self) {
        *self.disconnected.lock().expect("listener mutex") = true;
    }
}
