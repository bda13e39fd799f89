use crate::response::NotifyResponse;
use crate::transport::{NotifyRequest, NotifyTransport, TransportError};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::sync::oneshot::Receiver;
use tokio::time::timeout;

pub async fn expect_mpsc_response<T>(receiver: &mut UnboundedReceiver<T>) -> T {
    match timeout(Duration::from_millis(10), receiver.recv()).await {
        Ok(Some(response)) => response,
        Ok(None) => panic!("Channel unexpectedly closed"),
        Err(_) => panic!("No response received within timeout period"),
    }
}

pub async fn expect_oneshot_response<T>(receiver: Receiver<T>) -> T {
    match timeout(Duration::from_millis(10), receiver).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => panic!("Channel unexpectedly closed"),
        Err(_) => panic!("No response received within timeout period"),
    }
}

pub async fn expect_mpsc_timeout<T>(receiver: &mut UnboundedReceiver<T>)
where
    T: Debug,
{
    match timeout(Duration::from_millis(10), receiver.recv()).await {
        Ok(Some(response)) => panic!("Expected timeout, instead received {:?}", response),
        Ok(None) => panic!("Channel unexpectedly closed"),
        Err(_) => (),
    }
}

pub async fn expect_oneshot_timeout<T>(receiver: &mut Receiver<T>)
where
    T: Debug,
{
    match timeout(Duration::from_millis(10), receiver).await {
        Ok(Ok(response)) => panic!("Expected timeout, instead received {:?}", response),
        Ok(Err(_)) => panic!("Channel unexpectedly closed"),
        Err(_) => (),
    }
}

/// Transport that hands every outbound request to the test, which answers it by hand
pub struct TestTransport {
    sender: UnboundedSender<PendingExchange>,
}

/// A request sent through a [`TestTransport`] that is waiting for the test to answer it.
/// Dropping it without answering fails the request.
#[derive(Debug)]
pub struct PendingExchange {
    pub request: NotifyRequest,
    response_sender: oneshot::Sender<Result<NotifyResponse, TransportError>>,
}

impl TestTransport {
    pub fn new() -> (Self, UnboundedReceiver<PendingExchange>) {
        let (sender, receiver) = unbounded_channel();
        (TestTransport { sender }, receiver)
    }
}

impl NotifyTransport for TestTransport {
    fn send(
        &self,
        request: NotifyRequest,
    ) -> BoxFuture<'static, Result<NotifyResponse, TransportError>> {
        let (response_sender, response_receiver) = oneshot::channel();
        let _ = self.sender.send(PendingExchange {
            request,
            response_sender,
        });

        async move {
            match response_receiver.await {
                Ok(result) => result,
                Err(_) => Err(TransportError::NoResponse),
            }
        }
        .boxed()
    }
}

impl PendingExchange {
    /// Answers with a raw response, e.g. `"HTTP/1.1 200 OK\r\n\r\n"`
    pub fn respond(self, raw: &str) {
        let _ = self.response_sender.send(Ok(NotifyResponse::from(raw)));
    }

    /// Answers with a response split into the given chunks
    pub fn respond_chunks(self, chunks: Vec<Bytes>) {
        let response = NotifyResponse::from_chunks(chunks);
        let _ = self.response_sender.send(Ok(response));
    }

    /// Fails the request as if the control service could not be reached
    pub fn fail(self) {
        let _ = self.response_sender.send(Err(TransportError::NoResponse));
    }

    /// Value of a field in the request's form body
    pub fn field(&self, name: &str) -> Option<&str> {
        let query = match self.request.body.is_empty() {
            false => self.request.body.as_str(),
            true => self.request.url.split_once('?').map(|x| x.1).unwrap_or(""),
        };

        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}
