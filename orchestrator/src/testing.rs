//! In-memory container engine and store used by the lifecycle tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::{ErrorKind, RedisError, RedisResult, Value};

use crate::container::{
    ContainerRuntime, ContainerSpec, ContainerStatus, EngineError, ExecOutput,
};
use crate::store::{Endpoint, StoreCommand, StoreConnector, StoreLink};

const FIRST_HOST_PORT: u16 = 40000;

#[derive(Debug, Clone)]
enum Entry {
    Text(String),
    List(VecDeque<String>),
}

/// Just enough of a key-value store to exercise the lifecycle
#[derive(Debug, Default)]
struct FakeStore {
    data: HashMap<String, Entry>,
}

impl FakeStore {
    fn apply(&mut self, name: &str, args: &[String]) -> Result<Value, String> {
        let upper = name.to_ascii_uppercase();
        let arity = |ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(format!(
                    "ERR wrong number of arguments for '{}' command",
                    name.to_ascii_lowercase()
                ))
            }
        };

        match upper.as_str() {
            "PING" => Ok(Value::Status("PONG".to_string())),
            "SET" => {
                arity(args.len() == 2)?;
                self.data.insert(args[0].clone(), Entry::Text(args[1].clone()));
                Ok(Value::Okay)
            }
            "GET" => {
                arity(args.len() == 1)?;
                match self.data.get(&args[0]) {
                    Some(Entry::Text(text)) => Ok(Value::Data(text.clone().into_bytes())),
                    Some(Entry::List(_)) => Err(wrong_type()),
                    None => Ok(Value::Nil),
                }
            }
            "DEL" => {
                arity(!args.is_empty())?;
                let removed = args.iter().filter(|key| self.data.remove(*key).is_some()).count();
                Ok(Value::Int(removed as i64))
            }
            "LPUSH" | "RPUSH" => {
                arity(args.len() >= 2)?;
                let entry = self
                    .data
                    .entry(args[0].clone())
                    .or_insert_with(|| Entry::List(VecDeque::new()));
                let list = match entry {
                    Entry::List(list) => list,
                    Entry::Text(_) => return Err(wrong_type()),
                };
                for value in &args[1..] {
                    if upper == "LPUSH" {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                Ok(Value::Int(list.len() as i64))
            }
            "LRANGE" => {
                arity(args.len() == 3)?;
                let (start, stop) = match (args[1].parse::<i64>(), args[2].parse::<i64>()) {
                    (Ok(start), Ok(stop)) => (start, stop),
                    _ => return Err("ERR value is not an integer or out of range".to_string()),
                };
                let list = match self.data.get(&args[0]) {
                    Some(Entry::List(list)) => list,
                    Some(Entry::Text(_)) => return Err(wrong_type()),
                    None => return Ok(Value::Bulk(vec![])),
                };
                let len = list.len() as i64;
                let resolve = |i: i64| if i < 0 { len + i } else { i };
                let start = resolve(start).max(0);
                let stop = resolve(stop).min(len - 1);
                let items = (start..=stop)
                    .filter_map(|i| list.get(i as usize))
                    .map(|item| Value::Data(item.clone().into_bytes()))
                    .collect();
                Ok(Value::Bulk(items))
            }
            _ => Err(format!(
                "ERR unknown command '{}', with args beginning with: ",
                name
            )),
        }
    }
}

fn wrong_type() -> String {
    "WRONGTYPE Operation against a key holding the wrong kind of value".to_string()
}

fn server_error(message: String) -> RedisError {
    match message.strip_prefix("ERR ") {
        Some(detail) => RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            detail.to_string(),
        )),
        None => RedisError::from((
            ErrorKind::ExtensionError,
            "An error was signalled by the server",
            message,
        )),
    }
}

fn render_raw(value: &Value) -> String {
    match value {
        Value::Nil => String::new(),
        Value::Int(n) => n.to_string(),
        Value::Data(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Bulk(items) => items.iter().map(render_raw).collect::<Vec<_>>().join("\n"),
        Value::Status(status) => status.clone(),
        Value::Okay => "OK".to_string(),
    }
}

#[derive(Debug)]
struct FakeContainer {
    running: bool,
    host_port: u16,
    /// Bumped whenever existing connections must stop working
    generation: u64,
    store: FakeStore,
}

#[derive(Debug, Default)]
struct EngineState {
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    next_port: u16,
    reused_port: Option<u16>,
    refuse_connections: bool,
    fail_create: bool,
    fail_remove: bool,
    last_exec_deadline: Option<Duration>,
    failing_calls: usize,
    opened_links: usize,
    quits: usize,
    store_ops: usize,
    stops: usize,
    removes: usize,
}

impl EngineState {
    fn allocate_port(&mut self) -> u16 {
        if let Some(port) = self.reused_port.take() {
            return port;
        }
        if self.next_port == 0 {
            self.next_port = FIRST_HOST_PORT;
        }
        let port = self.next_port;
        self.next_port += 1;
        port
    }
}

/// Fake container engine whose containers host fake stores
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    /// Add a running container directly, bypassing create/start
    pub fn spawn_running(&self) -> (String, u16) {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("fake{}", state.next_id);
        let host_port = state.allocate_port();
        state.containers.insert(
            id.clone(),
            FakeContainer {
                running: true,
                host_port,
                generation: 0,
                store: FakeStore::default(),
            },
        );
        (id, host_port)
    }

    /// Simulate someone stopping the container behind our back
    pub fn stop_out_of_band(&self, id: &str) {
        if let Some(container) = self.state().containers.get_mut(id) {
            container.running = false;
            container.generation += 1;
        }
    }

    /// Kill open links without touching the container
    pub fn drop_connections(&self, id: &str) {
        if let Some(container) = self.state().containers.get_mut(id) {
            container.generation += 1;
        }
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Make the next `count` store calls fail as if the socket broke,
    /// while liveness pings keep succeeding
    pub fn fail_next_calls(&self, count: usize) {
        self.state().failing_calls = count;
    }

    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    /// Make container removal fail while stop keeps working
    pub fn fail_remove(&self, fail: bool) {
        self.state().fail_remove = fail;
    }

    /// Publish the next started container on `port`, as an engine does once
    /// the port's previous owner has stopped
    pub fn reuse_port(&self, port: u16) {
        self.state().reused_port = Some(port);
    }

    pub fn last_exec_deadline(&self) -> Option<Duration> {
        self.state().last_exec_deadline
    }

    pub fn live_containers(&self) -> usize {
        self.state().containers.len()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.state().containers.get(id).map(|c| c.running).unwrap_or(false)
    }

    pub fn opened_links(&self) -> usize {
        self.state().opened_links
    }

    pub fn quits(&self) -> usize {
        self.state().quits
    }

    pub fn store_ops(&self) -> usize {
        self.state().store_ops
    }

    pub fn stops(&self) -> usize {
        self.state().stops
    }

    pub fn removes(&self) -> usize {
        self.state().removes
    }

    fn link_alive(&self, id: &str, port: u16, generation: u64) -> bool {
        self.state()
            .containers
            .get(id)
            .map(|c| c.running && c.host_port == port && c.generation == generation)
            .unwrap_or(false)
    }
}

#[async_trait]
impl ContainerRuntime for FakeEngine {
    async fn ensure_image(&self, _image: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn create(&self, _spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.state();
        if state.fail_create {
            return Err(EngineError::Unavailable("engine is down".to_string()));
        }
        state.next_id += 1;
        let id = format!("fake{}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                running: false,
                host_port: 0,
                generation: 0,
                store: FakeStore::default(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let port = state.allocate_port();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if container.running {
            return Err(EngineError::NotModified);
        }
        container.running = true;
        container.host_port = port;
        container.generation += 1;
        Ok(())
    }

    async fn inspect(&self, id: &str, _service_port: u16) -> Result<ContainerStatus, EngineError> {
        let state = self.state();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Ok(ContainerStatus {
            running: container.running,
            host_port: container.running.then_some(container.host_port),
        })
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.stops += 1;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if !container.running {
            return Err(EngineError::NotModified);
        }
        container.running = false;
        container.generation += 1;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.removes += 1;
        if state.fail_remove {
            return Err(EngineError::Other("device or resource busy".to_string()));
        }
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn exec(
        &self,
        id: &str,
        cmd: Vec<String>,
        _output_limit: usize,
        deadline: Duration,
    ) -> Result<ExecOutput, EngineError> {
        let mut state = self.state();
        state.store_ops += 1;
        state.last_exec_deadline = Some(deadline);
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if !container.running {
            return Err(EngineError::Conflict(format!("container {} is not running", id)));
        }

        let (name, args) = match cmd.split_first() {
            Some((cli, rest)) if cli == "redis-cli" && !rest.is_empty() => (&rest[0], &rest[1..]),
            _ => return Err(EngineError::Other("unexpected exec command".to_string())),
        };

        let (output, exit_code) = match container.store.apply(name, args) {
            Ok(value) => (render_raw(&value), 0),
            Err(message) => (message, 1),
        };

        Ok(ExecOutput {
            output: output.trim_end().to_string(),
            stderr_seen: false,
            truncated: false,
            exit_code: Some(exit_code),
        })
    }

    async fn version(&self) -> Option<String> {
        Some("fake".to_string())
    }
}

/// Connector that opens links into `FakeEngine` containers by host port
pub struct FakeConnector {
    engine: Arc<FakeEngine>,
}

impl FakeConnector {
    pub fn new(engine: Arc<FakeEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StoreConnector for FakeConnector {
    async fn open(&self, endpoint: &Endpoint) -> RedisResult<Box<dyn StoreLink>> {
        let mut state = self.engine.state();
        let target = state
            .containers
            .iter()
            .find(|(_, c)| c.running && c.host_port == endpoint.port)
            .map(|(id, c)| (id.clone(), c.generation));

        match target {
            Some((id, generation)) if !state.refuse_connections => {
                state.opened_links += 1;
                Ok(Box::new(FakeLink {
                    engine: self.engine.clone(),
                    id,
                    port: endpoint.port,
                    generation,
                }))
            }
            _ => Err(RedisError::from(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        }
    }
}

struct FakeLink {
    engine: Arc<FakeEngine>,
    id: String,
    port: u16,
    generation: u64,
}

#[async_trait]
impl StoreLink for FakeLink {
    async fn call(&mut self, command: StoreCommand, args: &[String]) -> RedisResult<Value> {
        if !self.engine.link_alive(&self.id, self.port, self.generation) {
            return Err(RedisError::from(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            )));
        }

        let mut state = self.engine.state();
        if state.failing_calls > 0 {
            state.failing_calls -= 1;
            return Err(RedisError::from(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        state.store_ops += 1;
        let container = state
            .containers
            .get_mut(&self.id)
            .ok_or_else(|| RedisError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe)))?;
        container.store.apply(command.name(), args).map_err(server_error)
    }

    async fn ping(&mut self) -> bool {
        self.engine.link_alive(&self.id, self.port, self.generation)
    }

    async fn quit(&mut self) {
        self.engine.state().quits += 1;
    }
}
