//! Client connections to a sandbox's store

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, RedisResult, Value};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{SandboxError, SandboxResult};

use super::command::StoreCommand;

/// Delay between connection attempts while the store is still booting
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Network address of a store instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An open link to a store
#[async_trait]
pub trait StoreLink: Send {
    /// Send `command` with `args` in order and return the raw reply
    async fn call(&mut self, command: StoreCommand, args: &[String]) -> RedisResult<Value>;

    /// Whether the link still answers
    async fn ping(&mut self) -> bool;

    /// Politely close the link
    async fn quit(&mut self);
}

/// Opens links to stores
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> RedisResult<Box<dyn StoreLink>>;
}

/// `StoreConnector` for real Redis servers
pub struct RedisConnector {
    command_timeout: Duration,
}

impl RedisConnector {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn open(&self, endpoint: &Endpoint) -> RedisResult<Box<dyn StoreLink>> {
        let client = redis::Client::open(endpoint.url())?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Box::new(RedisLink {
            conn,
            command_timeout: self.command_timeout,
        }))
    }
}

struct RedisLink {
    conn: MultiplexedConnection,
    command_timeout: Duration,
}

#[async_trait]
impl StoreLink for RedisLink {
    async fn call(&mut self, command: StoreCommand, args: &[String]) -> RedisResult<Value> {
        let mut cmd = redis::cmd(command.name());
        for arg in args {
            cmd.arg(arg);
        }

        match timeout(self.command_timeout, cmd.query_async::<_, Value>(&mut self.conn)).await {
            Ok(reply) => reply,
            Err(_) => Err(RedisError::from(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("{} timed out after {:?}", command, self.command_timeout),
            ))),
        }
    }

    async fn ping(&mut self) -> bool {
        let ping = redis::cmd("PING");
        let probe = ping.query_async::<_, String>(&mut self.conn);
        matches!(timeout(self.command_timeout, probe).await, Ok(Ok(_)))
    }

    async fn quit(&mut self) {
        let _ = timeout(
            self.command_timeout,
            redis::cmd("QUIT").query_async::<_, ()>(&mut self.conn),
        )
        .await;
    }
}

/// A session's connection: the endpoint it targets and the link, if open
pub struct ConnectionHandle {
    endpoint: Endpoint,
    link: Option<Box<dyn StoreLink>>,
}

impl ConnectionHandle {
    /// A handle with no link yet; the first `ensure_open` connects it
    pub fn detached(endpoint: Endpoint) -> Self {
        Self { endpoint, link: None }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    pub fn link_mut(&mut self) -> Option<&mut (dyn StoreLink + 'static)> {
        self.link.as_deref_mut()
    }

    /// Drop the link without a goodbye; used when it is known to be dead
    pub fn invalidate(&mut self) {
        self.link = None;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Establishes, heals and closes store connections
pub struct ConnectionManager {
    connector: Arc<dyn StoreConnector>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn StoreConnector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
        }
    }

    /// Open a connection to `endpoint`.
    ///
    /// A freshly started store refuses connections until it has booted, so
    /// refusals are retried until the connect timeout runs out.
    pub async fn connect(&self, endpoint: Endpoint) -> SandboxResult<ConnectionHandle> {
        let link = self.open_link(&endpoint).await?;
        info!(endpoint = %endpoint, "Store connection established");
        Ok(ConnectionHandle {
            endpoint,
            link: Some(link),
        })
    }

    /// Make sure `handle` has a live link to `endpoint`, reconnecting if the
    /// link died or the endpoint moved. Returns `true` if it reconnected.
    pub async fn ensure_open(
        &self,
        handle: &mut ConnectionHandle,
        endpoint: &Endpoint,
    ) -> SandboxResult<bool> {
        if handle.endpoint != *endpoint {
            debug!(old = %handle.endpoint, new = %endpoint, "Store endpoint moved");
            self.close(handle).await;
            handle.endpoint = endpoint.clone();
        }

        if let Some(link) = handle.link.as_mut() {
            if link.ping().await {
                return Ok(false);
            }
            warn!(endpoint = %handle.endpoint, "Store connection lost, reconnecting");
            handle.link = None;
        }

        handle.link = Some(self.open_link(&handle.endpoint).await?);
        info!(endpoint = %handle.endpoint, "Store connection re-established");
        Ok(true)
    }

    /// Close the connection; a no-op if it is already closed
    pub async fn close(&self, handle: &mut ConnectionHandle) {
        if let Some(mut link) = handle.link.take() {
            link.quit().await;
            debug!(endpoint = %handle.endpoint, "Store connection closed");
        }
    }

    async fn open_link(&self, endpoint: &Endpoint) -> SandboxResult<Box<dyn StoreLink>> {
        let deadline = Instant::now() + self.connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = timeout(remaining, self.connector.open(endpoint)).await;

            match attempt {
                Ok(Ok(link)) => return Ok(link),
                Ok(Err(e)) if Instant::now() + RETRY_INTERVAL < deadline && is_transport(&e) => {
                    debug!(endpoint = %endpoint, error = %e, "Store not accepting connections yet");
                    sleep(RETRY_INTERVAL).await;
                }
                Ok(Err(e)) => {
                    return Err(SandboxError::Connection(format!("{}: {}", endpoint, e)));
                }
                Err(_) => {
                    return Err(SandboxError::Connection(format!(
                        "{}: connect timed out after {:?}",
                        endpoint, self.connect_timeout
                    )));
                }
            }
        }
    }
}

/// Whether a client error means the link is unusable, as opposed to the
/// store rejecting a command
pub fn is_transport(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

/// The store's own wording of an error reply, e.g. `ERR wrong number of
/// arguments for 'get' command`
pub fn store_message(err: &RedisError) -> String {
    match (err.code(), err.detail()) {
        (Some(code), Some(detail)) => format!("{} {}", code, detail),
        (Some(code), None) => code.to_string(),
        (None, Some(detail)) => detail.to_string(),
        (None, None) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeEngine};

    fn manager(engine: &Arc<FakeEngine>, timeout_ms: u64) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(FakeConnector::new(engine.clone())),
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn test_store_message_keeps_server_wording() {
        let err = RedisError::from((
            redis::ErrorKind::ResponseError,
            "An error was signalled by the server",
            "wrong number of arguments for 'get' command".to_string(),
        ));
        assert_eq!(store_message(&err), "ERR wrong number of arguments for 'get' command");
        assert!(!is_transport(&err));
    }

    #[test]
    fn test_io_errors_are_transport() {
        let err = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(is_transport(&err));
    }

    #[tokio::test]
    async fn test_connect_to_running_store() {
        let engine = FakeEngine::shared();
        let (_, port) = engine.spawn_running();

        let handle = manager(&engine, 500)
            .connect(Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();

        assert!(handle.is_open());
        assert_eq!(handle.endpoint().port, port);
    }

    #[tokio::test]
    async fn test_connect_refused_times_out() {
        let engine = FakeEngine::shared();

        let err = manager(&engine, 300)
            .connect(Endpoint::new("127.0.0.1", 1))
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::Connection(_)));
    }

    #[tokio::test]
    async fn test_ensure_open_reconnects_dead_link() {
        let engine = FakeEngine::shared();
        let (id, port) = engine.spawn_running();
        let connections = manager(&engine, 500);
        let endpoint = Endpoint::new("127.0.0.1", port);

        let mut handle = connections.connect(endpoint.clone()).await.unwrap();
        assert!(!connections.ensure_open(&mut handle, &endpoint).await.unwrap());

        engine.drop_connections(&id);
        assert!(connections.ensure_open(&mut handle, &endpoint).await.unwrap());
        assert_eq!(engine.opened_links(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let engine = FakeEngine::shared();
        let (_, port) = engine.spawn_running();
        let connections = manager(&engine, 500);

        let mut handle = connections.connect(Endpoint::new("127.0.0.1", port)).await.unwrap();
        connections.close(&mut handle).await;
        connections.close(&mut handle).await;

        assert!(!handle.is_open());
        assert_eq!(engine.quits(), 1);
    }
}
