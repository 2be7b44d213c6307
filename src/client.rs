//! Connection handles.
//!
//! A [`Client`] pairs a [`Backend`] with the key namespace and the
//! [`ScriptRegistry`] used to resolve script names. It is the unit the object
//! mapper binds models to: two clients compare equal when they reach the same
//! database under the same namespace.
//!
//! Every physical round trip made through a client is announced to its
//! subscribers as a [`CommandEvent`].

use crate::backend::{Backend, Command, MemoryBackend, Reply};
use crate::config::{ConnectionInfo, Options};
use crate::pipeline::Pipeline;
use crate::script::{ScriptDefinition, ScriptRegistry};
use crate::Result;
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Notification emitted once per round trip to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    /// Connection string of the backend the commands were sent to.
    pub connection: String,
    /// Names of the commands sent, in order.
    pub commands: Vec<String>,
    /// Whether the batch ran as a transaction.
    pub transaction: bool,
}

struct ClientInner {
    backend: Arc<dyn Backend>,
    options: Options,
    scripts: Arc<ScriptRegistry>,
    subscribers: Mutex<Vec<Sender<CommandEvent>>>,
}

/// A cheap-to-clone handle on a backend.
///
/// # Example
///
/// ```
/// use kvodm::Client;
///
/// # fn main() -> Result<(), kvodm::Error> {
/// let client = Client::open("memory://client-docs?namespace=test:")?;
/// assert_eq!(client.namespace(), "test:");
///
/// let events = client.subscribe();
/// client.script_call("delpattern", &[] as &[&str], &["nothing:*"])?;
/// // cold script cache: EVALSHA, then EVAL
/// assert_eq!(events.try_iter().count(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Opens a client from a connection string such as
    /// `memory://name?namespace=app:&script_timeout=500`.
    ///
    /// Connection strings naming the same in-process database share its
    /// keyspace for as long as one client holds it.
    pub fn open(url: &str) -> Result<Self> {
        let info = ConnectionInfo::parse(url)?;
        let backend = MemoryBackend::shared(&info.name, &info.options);
        Self::new(backend, info.options)
    }

    /// Creates a client over `backend` with the builtin scripts registered.
    pub fn new(backend: Arc<dyn Backend>, options: Options) -> Result<Self> {
        Self::with_scripts(backend, options, Arc::new(ScriptRegistry::with_builtins()))
    }

    /// Creates a client resolving script names through `scripts`.
    pub fn with_scripts(
        backend: Arc<dyn Backend>,
        options: Options,
        scripts: Arc<ScriptRegistry>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                backend,
                options,
                scripts,
                subscribers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Returns a client sharing this client's backend and scripts under a
    /// different key namespace.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Result<Self> {
        let options = self.inner.options.clone().namespace(namespace);
        Self::with_scripts(
            Arc::clone(&self.inner.backend),
            options,
            Arc::clone(&self.inner.scripts),
        )
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Identity of the underlying database.
    pub fn connection_string(&self) -> &str {
        self.inner.backend.connection_string()
    }

    /// Prefix prepended to every model key.
    pub fn namespace(&self) -> &str {
        &self.inner.options.namespace
    }

    /// The options this client was created with.
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// The script registry used to resolve script names.
    pub fn scripts(&self) -> &Arc<ScriptRegistry> {
        &self.inner.scripts
    }

    /// Registers for a notification per round trip. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> Receiver<CommandEvent> {
        let (tx, rx) = channel::unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    fn notify(&self, commands: &[Command], transaction: bool) {
        let mut subscribers = self.inner.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        let event = CommandEvent {
            connection: self.connection_string().to_string(),
            commands: commands.iter().map(|c| c.name().to_string()).collect(),
            transaction,
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Sends one command.
    pub fn execute(&self, command: &Command) -> Result<Reply> {
        self.notify(std::slice::from_ref(command), false);
        self.inner.backend.execute(command)
    }

    /// Sends a batch of commands in one round trip. An empty batch makes no
    /// round trip.
    pub fn execute_pipeline(
        &self,
        commands: &[Command],
        transaction: bool,
    ) -> Result<Vec<Result<Reply>>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        self.notify(commands, transaction);
        self.inner.backend.execute_pipeline(commands, transaction)
    }

    /// Calls the registered script `name`.
    ///
    /// The script is first run by hash. If the backend does not know the
    /// hash it is run once more by full source, which also caches it. The
    /// script's callback, if any, is applied to the reply.
    pub fn script_call<K, A>(&self, name: &str, keys: &[K], args: &[A]) -> Result<Reply>
    where
        K: AsRef<[u8]>,
        A: AsRef<[u8]>,
    {
        let definition = self.inner.scripts.get(name)?;
        let keys = to_bytes(keys);
        let args = to_bytes(args);
        let reply = self.run_script(&definition, &keys, &args)?;
        definition.apply_callback(reply, &args)
    }

    fn run_script(
        &self,
        definition: &ScriptDefinition,
        keys: &[Bytes],
        args: &[Bytes],
    ) -> Result<Reply> {
        match self.execute(&Command::evalsha(definition.sha1(), keys, args)) {
            Err(e) if e.is_no_script() => {
                log::debug!(
                    "script '{}' not cached on {}, sending source",
                    definition.name(),
                    self.connection_string()
                );
                self.execute(&Command::eval(definition.source(), keys, args))
            }
            other => other,
        }
    }

    /// Uploads the registered script `name` to the backend script cache and
    /// returns its hash.
    pub fn script_load(&self, name: &str) -> Result<String> {
        let definition = self.inner.scripts.get(name)?;
        let reply = self.execute(&Command::new("SCRIPT").arg("LOAD").arg(definition.source()))?;
        Ok(reply.as_str().unwrap_or(definition.sha1()).to_string())
    }

    /// Empties the backend script cache.
    pub fn script_flush(&self) -> Result<bool> {
        Ok(self.execute(&Command::new("SCRIPT").arg("FLUSH"))?.as_bool())
    }

    /// Starts a pipeline.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.clone(), false)
    }

    /// Starts a pipeline executed atomically.
    pub fn transaction(&self) -> Pipeline {
        Pipeline::new(self.clone(), true)
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.connection_string() == other.connection_string()
                && self.namespace() == other.namespace())
    }
}

impl Eq for Client {}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection_string())
            .field("namespace", &self.namespace())
            .finish()
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.connection_string())
    }
}

pub(crate) fn to_bytes<T: AsRef<[u8]>>(values: &[T]) -> Vec<Bytes> {
    values.iter().map(|v| Bytes::copy_from_slice(v.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn client() -> Client {
        Client::new(Arc::new(MemoryBackend::new()), Options::default()).unwrap()
    }

    #[test]
    fn test_equality_by_database() {
        let a = Client::open("memory://eq-test").unwrap();
        let b = Client::open("memory://eq-test").unwrap();
        let c = Client::open("memory://eq-test?namespace=x:").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(client(), client());
    }

    #[test]
    fn test_open_rejects_bad_url() {
        assert!(matches!(Client::open("redis://localhost"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_notifications() {
        let client = client();
        let events = client.subscribe();
        client.execute(&Command::new("PING")).unwrap();
        client.execute_pipeline(&[Command::new("PING"), Command::new("PING")], false).unwrap();
        client.execute_pipeline(&[], false).unwrap();

        let events: Vec<CommandEvent> = events.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].commands, vec!["PING", "PING"]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let client = client();
        drop(client.subscribe());
        client.execute(&Command::new("PING")).unwrap();
        assert!(client.inner.subscribers.lock().is_empty());
    }

    #[test]
    fn test_script_call_fallback_then_warm() {
        let client = client();
        client.scripts().register(ScriptDefinition::new("one", ["return 1"]));
        let events = client.subscribe();

        assert_eq!(client.script_call::<&str, &str>("one", &[], &[]).unwrap(), Reply::Integer(1));
        assert_eq!(events.try_iter().count(), 2);
        assert_eq!(client.script_call::<&str, &str>("one", &[], &[]).unwrap(), Reply::Integer(1));
        assert_eq!(events.try_iter().count(), 1);

        assert!(client.script_flush().unwrap());
        client.script_call::<&str, &str>("one", &[], &[]).unwrap();
        assert_eq!(events.try_iter().count(), 3);
    }

    #[test]
    fn test_script_errors_are_not_retried() {
        let client = client();
        client.scripts().register(ScriptDefinition::new("bad", ["return redis.call('nope')"]));
        let events = client.subscribe();
        client.script_load("bad").unwrap();
        let err = client.script_call::<&str, &str>("bad", &[], &[]).unwrap_err();
        assert!(matches!(err, Error::Response(_)));
        assert_eq!(events.try_iter().count(), 2);
    }

    #[test]
    fn test_unknown_script() {
        let client = client();
        let err = client.script_call::<&str, &str>("missing", &[], &[]).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_with_namespace_shares_backend() {
        let client = client();
        let other = client.with_namespace("other:").unwrap();
        assert_eq!(client.connection_string(), other.connection_string());
        assert_ne!(client, other);
        assert!(Arc::ptr_eq(client.scripts(), other.scripts()));
    }
}
