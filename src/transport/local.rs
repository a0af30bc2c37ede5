//! In-process parties, each running as its own tokio task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::Instrument;

use crate::{
    algebra::Ring,
    net::Id,
    protocols::spdz::Party,
    transport::{Remote, Request, Response, TransportError},
};

type Envelope<R> = (Request<R>, oneshot::Sender<Response<R>>);

/// Handle to a party actor.
#[derive(Debug, Clone)]
pub struct LocalRemote<R> {
    location: Id,
    mailbox: mpsc::UnboundedSender<Envelope<R>>,
}

/// Start an actor serving requests for `party`.
///
/// The actor stops when every handle to it has been dropped,
/// or when the returned task is aborted.
pub fn spawn<R: Ring>(party: Arc<Party<R>>) -> (LocalRemote<R>, JoinHandle<()>) {
    let location = party.id();
    let (mailbox, mut inbox) = mpsc::unbounded_channel::<Envelope<R>>();
    let span = tracing::info_span!("party", %location);
    let task = tokio::spawn(
        async move {
            while let Some((request, reply)) = inbox.recv().await {
                let name = request.name();
                let response = party.handle(request);
                if reply.send(response).is_err() {
                    tracing::warn!(request = name, "caller left before the response");
                }
            }
            tracing::debug!("all handles dropped, stopping");
        }
        .instrument(span),
    );
    (LocalRemote { location, mailbox }, task)
}

#[async_trait]
impl<R: Ring> Remote<R> for LocalRemote<R> {
    fn location(&self) -> Id {
        self.location
    }

    async fn call(&self, request: Request<R>) -> Result<Response<R>, TransportError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send((request, reply))
            .map_err(|_| TransportError::Unreachable(self.location))?;
        response
            .await
            .map_err(|_| TransportError::Unreachable(self.location))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        algebra::{ring::Z64, Shape},
        protocols::{Operation, TripleKey},
    };

    fn key() -> TripleKey {
        TripleKey::new(Operation::Mul, Shape::scalar(), Shape::scalar())
    }

    #[tokio::test]
    async fn call() {
        let (remote, _task) = spawn(Arc::new(Party::<Z64>::new(Id(3))));
        assert_eq!(remote.location(), Id(3));
        let res = remote.call(Request::Available { key: key() }).await.unwrap();
        assert_eq!(res, Response::Available(0));
    }

    #[tokio::test]
    async fn stopped_actor_is_unreachable() {
        let (remote, task) = spawn(Arc::new(Party::<Z64>::new(Id(1))));
        task.abort();
        let _ = task.await;
        let err = remote
            .call(Request::Available { key: key() })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(Id(1))));
    }
}
