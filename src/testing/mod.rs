//! Tools for running a protocol among several in-memory parties.

use std::future::Future;

use crate::net::network::InMemoryNetwork;

pub struct Cluster<Arg = ()> {
    players: Vec<InMemoryNetwork>,
    args: Vec<Arg>,
}

impl Cluster {
    pub fn new(size: usize) -> Self {
        let players = InMemoryNetwork::in_memory(size);
        let args = vec![(); size];
        Self { players, args }
    }

    /// Give each party its own input, in order of their index.
    pub fn with_args<A>(self, args: Vec<A>) -> Cluster<A> {
        assert_eq!(self.players.len(), args.len(), "one argument per party");
        Cluster {
            players: self.players,
            args,
        }
    }

    pub async fn run<T, P, F>(self, prg: P) -> Vec<T>
    where
        P: Fn(InMemoryNetwork) -> F,
        F: Future<Output = T>,
    {
        self.run_with_args(|network, ()| prg(network)).await
    }
}

impl<A> Cluster<A> {
    /// Run `prg` for every party concurrently, collecting the outputs by index.
    pub async fn run_with_args<T, P, F>(self, prg: P) -> Vec<T>
    where
        P: Fn(InMemoryNetwork, A) -> F,
        F: Future<Output = T>,
    {
        let futures = self
            .players
            .into_iter()
            .zip(self.args)
            .map(|(network, arg)| prg(network, arg));
        futures::future::join_all(futures).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::Id;

    #[tokio::test]
    async fn hello() {
        let post = Cluster::new(5)
            .run(|mut network| async move {
                let msg = "Joy to the world!".to_owned();
                network.broadcast(&msg).await.unwrap();
                let post: Vec<String> = network.receive_all().await.unwrap();
                post
            })
            .await;
        for received in post {
            assert_eq!(received.len(), 4);
            assert!(received.iter().all(|m| m == "Joy to the world!"));
        }
    }

    #[tokio::test]
    async fn arguments() {
        let ids = Cluster::new(3)
            .with_args(vec![Id(0), Id(1), Id(2)])
            .run_with_args(|network, id| async move {
                assert_eq!(Id(network.index), id);
                id
            })
            .await;
        assert_eq!(ids, [Id(0), Id(1), Id(2)]);
    }
}
