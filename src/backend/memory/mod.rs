//! # MemoryBackend - In-Process Key-Value Store
//!
//! An in-process implementation of [`Backend`] covering the command set the
//! object mapper and the script layer consume: strings, lists, sets, sorted
//! sets, hashes, key scanning and server-side Lua scripting.
//!
//! ## Design
//!
//! - The keyspace lives behind a single lock; every command, and every
//!   transactional batch, runs with exclusive access to it
//! - Scripts are cached by the SHA-1 of their source, exactly like the
//!   remote store does: `EVAL` and `SCRIPT LOAD` populate the cache,
//!   `EVALSHA` of an unknown hash fails with `NOSCRIPT`, `SCRIPT FLUSH`
//!   empties it
//! - Non-transactional pipelines release the lock between commands
//!
//! ## Example
//!
//! ```
//! use kvodm::backend::{Backend, Command, MemoryBackend, Reply};
//!
//! # fn main() -> Result<(), kvodm::Error> {
//! let backend = MemoryBackend::named("docs");
//! backend.execute(&Command::new("SADD").arg("planets").arg("mars"))?;
//! let reply = backend.execute(&Command::new("SCARD").arg("planets"))?;
//! assert_eq!(reply, Reply::Integer(1));
//! # Ok(())
//! # }
//! ```

mod lua;
mod store;

use self::lua::LuaEngine;
use self::store::{parse_int, Store, KNOWN_COMMANDS};
use crate::backend::{Backend, Command, Reply};
use crate::config::Options;
use crate::script::script_sha1;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

static ANONYMOUS_BACKENDS: AtomicU64 = AtomicU64::new(1);

/// Live named backends, so that opening the same connection string twice
/// reaches the same keyspace.
static NAMED_BACKENDS: OnceLock<Mutex<HashMap<String, Weak<MemoryBackend>>>> = OnceLock::new();

/// In-process backend with an embedded Lua interpreter.
///
/// # Thread Safety
///
/// `MemoryBackend` is `Send + Sync` and is normally shared through an
/// `Arc<dyn Backend>` inside a [`Client`](crate::Client).
pub struct MemoryBackend {
    /// Identity reported by [`Backend::connection_string`]
    connection_string: String,

    /// The keyspace
    store: Mutex<Store>,

    /// Script cache: sha1 -> source
    scripts: RwLock<HashMap<String, String>>,

    /// Script interpreter
    engine: LuaEngine,
}

impl MemoryBackend {
    /// Creates a backend with a unique, generated name.
    pub fn new() -> Self {
        let id = ANONYMOUS_BACKENDS.fetch_add(1, Ordering::Relaxed);
        Self::named(&format!("anonymous-{}", id))
    }

    /// Creates a backend identified as `memory://<name>`.
    pub fn named(name: &str) -> Self {
        Self::with_options(name, &Options::default())
    }

    /// Creates a backend honouring the script timeout in `options`.
    pub fn with_options(name: &str, options: &Options) -> Self {
        Self {
            connection_string: format!("{}://{}", crate::config::MEMORY_SCHEME, name),
            store: Mutex::new(Store::default()),
            scripts: RwLock::new(HashMap::new()),
            engine: LuaEngine::new(options.script_timeout_duration()),
        }
    }

    /// Returns the live backend named `name`, creating it with `options` if
    /// none exists. The options of the first opener win.
    pub fn shared(name: &str, options: &Options) -> Arc<Self> {
        let mut backends = NAMED_BACKENDS.get_or_init(Default::default).lock();
        backends.retain(|_, backend| backend.strong_count() > 0);
        if let Some(existing) = backends.get(name).and_then(Weak::upgrade) {
            return existing;
        }
        let backend = Arc::new(Self::with_options(name, options));
        backends.insert(name.to_string(), Arc::downgrade(&backend));
        log::debug!("opened {}", backend.connection_string);
        backend
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of scripts held in the script cache.
    pub fn cached_scripts(&self) -> usize {
        self.scripts.read().len()
    }

    fn run(&self, store: &mut Store, cmd: &Command) -> Result<Reply> {
        match cmd.name() {
            "EVAL" => {
                let (source, keys, args) = split_script_frame(cmd)?;
                let source = std::str::from_utf8(source)
                    .map_err(|_| Error::response("ERR script source is not valid UTF-8"))?;
                self.scripts
                    .write()
                    .entry(script_sha1(source))
                    .or_insert_with(|| source.to_string());
                self.engine.eval(store, source, keys, args)
            }
            "EVALSHA" => {
                let (sha, keys, args) = split_script_frame(cmd)?;
                let sha = String::from_utf8_lossy(sha).to_ascii_lowercase();
                let source = self.scripts.read().get(&sha).cloned().ok_or_else(Error::no_script)?;
                self.engine.eval(store, &source, keys, args)
            }
            "SCRIPT" => self.script_command(cmd),
            _ => store.dispatch(cmd),
        }
    }

    fn script_command(&self, cmd: &Command) -> Result<Reply> {
        let args = cmd.args_slice();
        let sub = args
            .first()
            .map(|s| String::from_utf8_lossy(s).to_ascii_uppercase())
            .ok_or_else(|| Error::response("ERR wrong number of arguments for 'script' command"))?;
        match sub.as_str() {
            "FLUSH" => {
                self.scripts.write().clear();
                Ok(Reply::ok())
            }
            "LOAD" if args.len() == 2 => {
                let source = std::str::from_utf8(&args[1])
                    .map_err(|_| Error::response("ERR script source is not valid UTF-8"))?;
                let sha = script_sha1(source);
                self.scripts.write().insert(sha.clone(), source.to_string());
                Ok(Reply::bulk(sha))
            }
            "EXISTS" => {
                let scripts = self.scripts.read();
                let found = args[1..]
                    .iter()
                    .map(|sha| {
                        let sha = String::from_utf8_lossy(sha).to_ascii_lowercase();
                        Reply::Integer(scripts.contains_key(&sha) as i64)
                    })
                    .collect();
                Ok(Reply::Array(found))
            }
            other => Err(Error::response(format!("ERR unknown SCRIPT subcommand '{}'", other))),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn execute(&self, command: &Command) -> Result<Reply> {
        let mut store = self.store.lock();
        self.run(&mut store, command)
    }

    fn execute_pipeline(
        &self,
        commands: &[Command],
        transaction: bool,
    ) -> Result<Vec<Result<Reply>>> {
        if !transaction {
            return Ok(commands.iter().map(|cmd| self.execute(cmd)).collect());
        }

        // MULTI rejects unknown commands at queue time and EXEC then aborts.
        if let Some(bad) = commands.iter().find(|cmd| !KNOWN_COMMANDS.contains(&cmd.name())) {
            return Err(Error::response(format!(
                "EXECABORT Transaction discarded because of previous errors: unknown command '{}'",
                bad.name()
            )));
        }

        let mut store = self.store.lock();
        Ok(commands.iter().map(|cmd| self.run(&mut store, cmd)).collect())
    }
}

/// Splits `EVAL`/`EVALSHA` arguments into body, `KEYS` and `ARGV`.
fn split_script_frame(cmd: &Command) -> Result<(&Bytes, &[Bytes], &[Bytes])> {
    let args = cmd.args_slice();
    if args.len() < 2 {
        return Err(Error::response(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd.name().to_ascii_lowercase()
        )));
    }
    let numkeys = parse_int(&args[1])?;
    if numkeys < 0 {
        return Err(Error::response("ERR Number of keys can't be negative"));
    }
    let numkeys = numkeys as usize;
    if numkeys > args.len() - 2 {
        return Err(Error::response("ERR Number of keys can't be greater than number of args"));
    }
    let (keys, argv) = args[2..].split_at(numkeys);
    Ok((&args[0], keys, argv))
}
