use redis::aio::{Connection, MultiplexedConnection};
use redis::{Client, RedisResult};

/// Hands out connections to a single Redis server
///
/// Regular commands share one multiplexed connection. Blocking commands like `XREADGROUP ... BLOCK`
/// would stall every other user of that connection and thus get a dedicated one.
#[derive(Clone)]
pub struct RedisFactory {
    client: Client,
    shared: MultiplexedConnection,
}

impl RedisFactory {
    /// Connects to the server at `url` and establishes the shared connection
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let shared = client.get_multiplexed_tokio_connection().await?;

        Ok(Self { client, shared })
    }

    /// Handle to the shared, multiplexed connection
    pub fn shared(&self) -> MultiplexedConnection {
        self.shared.clone()
    }

    /// Opens a new dedicated connection
    pub async fn owned(&self) -> RedisResult<Connection> {
        self.client.get_async_connection().await
    }
}
