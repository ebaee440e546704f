use std::time::Duration;

use async_trait::async_trait;
use comms::{
    msg::{Command, Msg, Payload},
    specs::{CombinerStats, ComputePlan, ModelId},
};
use log::debug;
use tokio::{net::TcpStream, time};

use super::Combiner;
use crate::error::CombinerError;

/// A combiner reached over TCP, one connection per request.
#[derive(Debug, Clone)]
pub struct RemoteCombiner {
    name: String,
    addr: String,
    timeout: Duration,
}

impl RemoteCombiner {
    /// Creates a new `RemoteCombiner`.
    ///
    /// # Arguments
    /// * `name` - The unique name of the combiner.
    /// * `addr` - The network address the combiner listens on.
    /// * `timeout` - The bound for each request, connecting included.
    pub fn new(name: impl Into<String>, addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            timeout,
        }
    }

    /// Sends `cmd` and hands the reply to `on_reply`.
    ///
    /// # Returns
    /// Whatever `on_reply` makes of the reply, or a `CombinerError` if the
    /// exchange fails or doesn't finish in time.
    async fn request<T, F>(&self, cmd: Command, on_reply: F) -> Result<T, CombinerError>
    where
        T: Send,
        F: FnOnce(Msg<'_>) -> Result<T, CombinerError> + Send,
    {
        let exchange = async {
            let stream = TcpStream::connect(&self.addr).await?;
            let (rx, tx) = stream.into_split();
            let (mut rx, mut tx) = comms::channel(rx, tx);

            debug!(combiner = self.name.as_str(); "sending {cmd:?}");
            tx.send(&Msg::Control(cmd)).await?;

            let mut buf = Vec::new();
            let reply: Msg = rx.recv_into(&mut buf).await?;
            on_reply(reply)
        };

        time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| CombinerError::Timeout(self.timeout))?
    }

    async fn expect_ack(&self, cmd: Command) -> Result<(), CombinerError> {
        self.request(cmd, |reply| match reply {
            Msg::Control(Command::Ack) => Ok(()),
            other => unexpected(other),
        })
        .await
    }
}

fn unexpected<T>(msg: Msg<'_>) -> Result<T, CombinerError> {
    match msg {
        Msg::Err(detail) => Err(CombinerError::Remote(detail.into_owned())),
        other => Err(CombinerError::UnexpectedMessage(other.kind())),
    }
}

#[async_trait]
impl Combiner for RemoteCombiner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn report(&self) -> Result<CombinerStats, CombinerError> {
        self.request(Command::Report, |reply| match reply {
            Msg::Control(Command::Status(stats)) => Ok(stats),
            other => unexpected(other),
        })
        .await
    }

    async fn start(&self, plan: &ComputePlan) -> Result<(), CombinerError> {
        self.expect_ack(Command::Start(plan.clone())).await
    }

    async fn set_model_id(&self, id: &ModelId) -> Result<(), CombinerError> {
        self.expect_ack(Command::SetModelId(id.clone())).await
    }

    async fn get_model_id(&self) -> Result<Option<ModelId>, CombinerError> {
        self.request(Command::GetModelId, |reply| match reply {
            Msg::Control(Command::ModelId(id)) => Ok(id),
            other => unexpected(other),
        })
        .await
    }

    async fn get_model(&self) -> Result<Option<Vec<u8>>, CombinerError> {
        self.request(Command::GetModel, |reply| match reply {
            Msg::Data(Payload::Model(bytes)) => Ok(Some(bytes.to_vec())),
            Msg::Control(Command::NoModel) => Ok(None),
            other => unexpected(other),
        })
        .await
    }

    async fn allowing_clients(&self) -> Result<bool, CombinerError> {
        self.request(Command::AllowingClients, |reply| match reply {
            Msg::Control(Command::Allowing(allowing)) => Ok(allowing),
            other => unexpected(other),
        })
        .await
    }
}
