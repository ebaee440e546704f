use std::{borrow::Cow, io};

use crate::{
    Deserialize, Serialize,
    specs::{CombinerStats, ComputePlan, ModelId},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A serialized model, opaque at this layer.
    Model(&'a [u8]),
}

/// The command for the `Control` variant of the `Msg` enum.
///
/// Requests flow from the reducer to a combiner, every request is answered by exactly one reply.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Asks for the combiner's load statistics, answered with `Status`.
    Report,
    Status(CombinerStats),
    /// Hands a compute plan to the combiner, answered with `Ack`.
    Start(ComputePlan),
    /// Sets the combiner's baseline model, answered with `Ack`.
    SetModelId(ModelId),
    /// Asks for the combiner's local model id, answered with `ModelId`.
    GetModelId,
    ModelId(Option<ModelId>),
    /// Asks for the combiner's local model, answered with `Data(Model)` or `NoModel`.
    GetModel,
    NoModel,
    /// Asks whether the combiner accepts more clients, answered with `Allowing`.
    AllowingClients,
    Allowing(bool),
    Ack,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Returns a short name for the message kind, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Data(Payload::Model(_)) => "data/model",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&(0 as Header).to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&(1 as Header).to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(Payload::Model(bytes)) => {
                buf.extend_from_slice(&(2 as Header).to_be_bytes());
                Ok(Some(bytes))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let Some((kind_buf, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Self::buf_is_too_small(buf.len());
        };

        match Header::from_be_bytes(*kind_buf) {
            0 => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            1 => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            2 => Ok(Self::Data(Payload::Model(rest))),
            kind => Self::invalid_kind_byte(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io;

    use super::*;
    use crate::specs::Task;

    #[tokio::test]
    async fn test_control_and_model_share_a_stream() -> io::Result<()> {
        let (left, right) = io::duplex(256);
        let (_, tx) = io::split(left);
        let (rx, _) = io::split(right);
        let (mut rx, mut tx) = crate::channel(rx, tx);

        let plan = ComputePlan {
            task: Task::Training,
            rounds: 1,
            model_id: Some(ModelId::from("m-0")),
            clients_required: 2,
            round_timeout: Duration::from_secs(30),
            params: serde_json::Map::new(),
        };
        let blob = vec![7u8; 1000];

        let sent = Command::Start(plan.clone());
        tx.send(&Msg::Control(sent.clone())).await?;

        let mut buf = Vec::new();
        match rx.recv_into(&mut buf).await? {
            Msg::Control(cmd) => assert_eq!(cmd, sent),
            other => panic!("unexpected msg: {other:?}"),
        }

        let send = async { tx.send(&Msg::Data(Payload::Model(&blob))).await };
        let recv = async {
            let mut buf = Vec::new();
            match rx.recv_into(&mut buf).await? {
                Msg::Data(Payload::Model(bytes)) => Ok::<_, io::Error>(bytes.to_vec()),
                other => panic!("unexpected msg: {other:?}"),
            }
        };

        let (sent, received) = tokio::join!(send, recv);
        sent?;
        assert_eq!(received?, blob);
        Ok(())
    }

    #[test]
    fn test_error_message_borrows_frame() {
        let mut buf = Vec::new();
        let msg = Msg::Err(Cow::Borrowed("no model"));
        let tail = msg.serialize(&mut buf).unwrap().unwrap();
        buf.extend_from_slice(tail);

        match Msg::deserialize(&buf).unwrap() {
            Msg::Err(detail) => assert_eq!(detail, "no model"),
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let buf = 9u32.to_be_bytes();
        let err = Msg::deserialize(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_rejects_short_frame() {
        let err = Msg::deserialize(&[0, 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
