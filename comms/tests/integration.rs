use std::{borrow::Cow, io, time::Duration};

use comms::{
    Deserialize, Serialize,
    msg::{Command, Msg, Payload},
    specs::{CombinerStats, ComputePlan, Task},
};
use tokio::net::{TcpListener, TcpStream};

struct Tag<'a>(&'a str);

impl<'a> Serialize<'a> for Tag<'_> {
    fn serialize(&'a self, _buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        Ok(Some(self.0.as_bytes()))
    }
}

impl<'a> Deserialize<'a> for Tag<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let tag =
            std::str::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self(tag))
    }
}

#[tokio::test]
async fn send_recv_custom_type() {
    let msg = Tag("combiner-0");

    let (one, two) = tokio::io::duplex(128);
    let (rx, tx) = tokio::io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&msg).await.unwrap();

    let (rx, tx) = tokio::io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf = Vec::new();
    let tag: Tag = rx.recv_into(&mut buf).await.unwrap();

    assert_eq!(tag.0, msg.0);
}

#[tokio::test]
async fn request_reply_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let combiner = tokio::spawn(async move {
        let model = vec![1u8, 2, 3, 4];

        for _ in 0..3 {
            let (stream, _) = listener.accept().await.unwrap();
            let (rx, tx) = stream.into_split();
            let (mut rx, mut tx) = comms::channel(rx, tx);

            let mut buf = Vec::new();
            let reply = match rx.recv_into(&mut buf).await.unwrap() {
                Msg::Control(Command::Report) => Msg::Control(Command::Status(CombinerStats {
                    name: "combiner-0".into(),
                    active_clients: 3,
                })),
                Msg::Control(Command::Start(plan)) if plan.model_id.is_none() => {
                    Msg::Err(Cow::Borrowed("no baseline model"))
                }
                Msg::Control(Command::GetModel) => Msg::Data(Payload::Model(&model)),
                other => panic!("unexpected request: {other:?}"),
            };

            tx.send(&reply).await.unwrap();
        }
    });

    async fn request(addr: std::net::SocketAddr, cmd: Command) -> (Vec<u8>, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = comms::channel(rx, tx);

        tx.send(&Msg::Control(cmd)).await.unwrap();

        let mut buf = Vec::new();
        match rx.recv_into(&mut buf).await.unwrap() {
            Msg::Control(Command::Status(stats)) => (Vec::new(), stats.name),
            Msg::Data(Payload::Model(bytes)) => (bytes.to_vec(), String::new()),
            Msg::Err(detail) => (Vec::new(), detail.into_owned()),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    let (_, name) = request(addr, Command::Report).await;
    assert_eq!(name, "combiner-0");

    let plan = ComputePlan {
        task: Task::Training,
        rounds: 1,
        model_id: None,
        clients_required: 1,
        round_timeout: Duration::from_secs(5),
        params: serde_json::Map::new(),
    };
    let (_, detail) = request(addr, Command::Start(plan)).await;
    assert_eq!(detail, "no baseline model");

    let (model, _) = request(addr, Command::GetModel).await;
    assert_eq!(model, [1, 2, 3, 4]);

    combiner.await.unwrap();
}
