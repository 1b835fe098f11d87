//! Requests sent from [`Client`](crate::Client) handles to the actor.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::{
    client::Interest,
    error::ClientError,
    headers::HeaderMap,
    message::Message,
    proto::Sid,
    request::RequestSpec,
    subscription::Termination,
};

pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;
pub(crate) type CommandReceiver = mpsc::UnboundedReceiver<Command>;
pub(crate) type Completion = oneshot::Sender<Result<(), ClientError>>;

#[derive(Debug)]
pub(crate) enum Command {
    Publish {
        subject: String,
        reply: Option<String>,
        headers: Option<HeaderMap>,
        payload: Bytes,
    },
    Subscribe {
        sid: Sid,
        subject: String,
        queue_group: Option<String>,
        max: Option<u64>,
        timeout: Option<(Duration, u64)>,
        sender: mpsc::Sender<Message>,
        termination: Arc<OnceLock<Termination>>,
    },
    Unsubscribe {
        interest: Interest,
        max: Option<u64>,
    },
    Request {
        subject: String,
        headers: Option<HeaderMap>,
        payload: Bytes,
        spec: RequestSpec,
    },
    Flush(Completion),
    Drain(Completion),
    Close(oneshot::Sender<()>),
}
