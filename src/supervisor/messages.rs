use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Independently running parts of the rig that accept requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Owns the coordinator and runs sessions.
    Harness,
    /// Owns the frame region and its producer.
    Imaging,
    /// Listens for values the virtual environment reports back.
    Receiver,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Harness, Component::Imaging, Component::Receiver];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Harness => "harness",
            Self::Imaging => "imaging",
            Self::Receiver => "receiver",
        }
    }
}

/// Acknowledgement kinds, one per request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckKind {
    ConnectCommandSink,
    ConnectFrameSource,
    TestCommandSink,
    TestFrameSource,
    LoadPipeline,
    RunSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    /// Actuator address, `ip:port`.
    ConnectCommandSink { addr: String },
    /// Imaging channel to acquire from.
    ConnectFrameSource { channel: u32 },
    /// Send this many zero commands to the actuator.
    TestCommandSink { packets: u32 },
    /// Preview frames for a while without decoding.
    TestFrameSource { duration_s: f64 },
    /// Pipeline file name, relative to the configured pipeline directory.
    LoadPipeline { file_name: String },
    RunSession { duration_s: f64 },
}

impl Request {
    pub fn expected_ack(&self) -> AckKind {
        match self {
            Self::ConnectCommandSink { .. } => AckKind::ConnectCommandSink,
            Self::ConnectFrameSource { .. } => AckKind::ConnectFrameSource,
            Self::TestCommandSink { .. } => AckKind::TestCommandSink,
            Self::TestFrameSource { .. } => AckKind::TestFrameSource,
            Self::LoadPipeline { .. } => AckKind::LoadPipeline,
            Self::RunSession { .. } => AckKind::RunSession,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Ack { ack: AckKind },
    /// The host received the request but refused to act on it.
    Rejected { request: AckKind, reason: String },
}

impl Reply {
    pub fn ack(kind: AckKind) -> Self {
        Self::Ack { ack: kind }
    }

    pub fn rejected(request: AckKind, reason: impl ToString) -> Self {
        Self::Rejected {
            request,
            reason: reason.to_string(),
        }
    }
}

/// Where a host sends its reply. A host may reply before it finishes
/// working on the request; its mailbox stays blocked until it does.
pub struct ReplyHandle(oneshot::Sender<Reply>);

impl ReplyHandle {
    pub fn send(self, reply: Reply) {
        // The requester may have given up; nothing left to tell it.
        let _ = self.0.send(reply);
    }
}

/// A request in flight to a host.
pub struct Envelope {
    pub request: Request,
    pub reply: ReplyHandle,
}

impl Envelope {
    pub fn new(request: Request) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                reply: ReplyHandle(tx),
            },
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_request_has_its_own_ack() {
        let requests = [
            Request::ConnectCommandSink {
                addr: "127.0.0.1:1".to_string(),
            },
            Request::ConnectFrameSource { channel: 2 },
            Request::TestCommandSink { packets: 5 },
            Request::TestFrameSource { duration_s: 1.0 },
            Request::LoadPipeline {
                file_name: "a.json".to_string(),
            },
            Request::RunSession { duration_s: 1.0 },
        ];
        let mut acks: Vec<AckKind> = requests.iter().map(Request::expected_ack).collect();
        acks.sort_by_key(|a| format!("{:?}", a));
        acks.dedup();
        assert_eq!(acks.len(), requests.len());
    }

    #[test]
    fn test_wire_form() {
        let json = serde_json::to_value(Request::RunSession { duration_s: 2.5 }).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "run_session", "duration_s": 2.5}));
    }
}
