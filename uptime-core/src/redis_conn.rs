use redis::Client;
use redis::aio::MultiplexedConnection;

use crate::{config::RedisConfig, error::Result};

pub type RedisPool = Client;

pub fn create_redis_client(config: &RedisConfig) -> Result<RedisPool> {
    let client = Client::open(config.url.as_str())?;
    Ok(client)
}

/// Opens a multiplexed connection and verifies it with a PING.
pub async fn connect(client: &RedisPool) -> Result<MultiplexedConnection> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(conn)
}
