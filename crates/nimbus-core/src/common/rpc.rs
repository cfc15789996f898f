use std::fmt::{Debug, Formatter};
use tokio::sync::{mpsc, oneshot};

/// Used by an actor to answer a request made through [`initiate_request`].
#[must_use = "response token should be used to respond to a request"]
pub struct ResponseToken<T> {
    sender: oneshot::Sender<T>,
}

impl<T> Debug for ResponseToken<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResponseToken")
    }
}

impl<T> ResponseToken<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    pub fn respond(self, response: T) {
        if self.sender.send(response).is_err() {
            log::warn!("Could not send RPC response, the requester has gone away");
        }
    }
}

/// Sends a request created by `make_request` and returns a receiver for its response.
///
/// If the actor is gone, the receiver resolves to an error.
pub fn initiate_request<F, Response, R>(make_request: F) -> oneshot::Receiver<Response>
where
    F: FnOnce(ResponseToken<Response>) -> Result<(), mpsc::error::SendError<R>>,
    R: Debug,
{
    let (token, rx) = ResponseToken::new();
    if let Err(error) = make_request(token) {
        log::warn!("Could not make RPC request: {error:?}");
    }
    rx
}

pub type RpcSender<T> = mpsc::UnboundedSender<T>;
pub type RpcReceiver<T> = mpsc::UnboundedReceiver<T>;

pub fn make_rpc_queue<T>() -> (RpcSender<T>, RpcReceiver<T>) {
    mpsc::unbounded_channel()
}
