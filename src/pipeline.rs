//! Batched command submission.
//!
//! A [`Pipeline`] queues ordinary commands and script calls and sends them in
//! a single batch. Script calls travel by hash; when `execute` is asked to
//! load scripts, one `SCRIPT EXISTS` round trip comes first and scripts the
//! backend has not cached travel by source inside the batch, so every slot
//! runs in submission order.

use crate::backend::{Command, Reply};
use crate::client::{to_bytes, Client};
use crate::script::ScriptDefinition;
use crate::Result;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;

/// What a queued command stands for.
enum Slot {
    Command,
    Script { definition: Arc<ScriptDefinition>, keys: Vec<Bytes>, args: Vec<Bytes> },
}

/// A queue of commands flushed in one round trip.
///
/// # Example
///
/// ```
/// use kvodm::Client;
///
/// # fn main() -> Result<(), kvodm::Error> {
/// let client = Client::open("memory://pipeline-docs")?;
/// let mut pipe = client.pipeline();
/// pipe.script_call("delpattern", &[] as &[&str], &["tmp:*"])?;
/// pipe.sadd("planets", &["mars", "venus"]);
///
/// let results = pipe.execute(true)?;
/// assert_eq!(results.len(), 2);
/// assert_eq!(results[0].as_ref().unwrap().as_int(), Some(0));
/// assert_eq!(results[1].as_ref().unwrap().as_int(), Some(2));
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    client: Client,
    transaction: bool,
    commands: Vec<Command>,
    slots: Vec<Slot>,
}

impl Pipeline {
    pub(crate) fn new(client: Client, transaction: bool) -> Self {
        Self { client, transaction, commands: Vec::new(), slots: Vec::new() }
    }

    /// Queues an ordinary command.
    pub fn command(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self.slots.push(Slot::Command);
        self
    }

    /// Queues `SET key value`.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> &mut Self {
        self.command(Command::new("SET").arg(key).arg(value))
    }

    /// Queues `GET key`.
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        self.command(Command::new("GET").arg(key))
    }

    /// Queues `DEL key`.
    pub fn del(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        self.command(Command::new("DEL").arg(key))
    }

    /// Queues `INCR key`.
    pub fn incr(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        self.command(Command::new("INCR").arg(key))
    }

    /// Queues `SADD key members...`.
    pub fn sadd<M: AsRef<[u8]>>(&mut self, key: impl AsRef<[u8]>, members: &[M]) -> &mut Self {
        self.command(Command::new("SADD").arg(key).args(members))
    }

    /// Queues `SREM key members...`.
    pub fn srem<M: AsRef<[u8]>>(&mut self, key: impl AsRef<[u8]>, members: &[M]) -> &mut Self {
        self.command(Command::new("SREM").arg(key).args(members))
    }

    /// Queues `SMEMBERS key`.
    pub fn smembers(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        self.command(Command::new("SMEMBERS").arg(key))
    }

    /// Queues `RPUSH key values...`.
    pub fn rpush<V: AsRef<[u8]>>(&mut self, key: impl AsRef<[u8]>, values: &[V]) -> &mut Self {
        self.command(Command::new("RPUSH").arg(key).args(values))
    }

    /// Queues `HSET key field value [field value ...]`.
    pub fn hset<F: AsRef<[u8]>, V: AsRef<[u8]>>(
        &mut self,
        key: impl AsRef<[u8]>,
        pairs: &[(F, V)],
    ) -> &mut Self {
        let mut command = Command::new("HSET").arg(key);
        for (field, value) in pairs {
            command = command.arg(field).arg(value);
        }
        self.command(command)
    }

    /// Queues `HGETALL key`.
    pub fn hgetall(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        self.command(Command::new("HGETALL").arg(key))
    }

    /// Queues a call of the registered script `name`.
    ///
    /// Fails immediately with [`Error::NotFound`](crate::Error::NotFound)
    /// if the name is not registered.
    pub fn script_call<K, A>(&mut self, name: &str, keys: &[K], args: &[A]) -> Result<&mut Self>
    where
        K: AsRef<[u8]>,
        A: AsRef<[u8]>,
    {
        let definition = self.client.scripts().get(name)?;
        let keys = to_bytes(keys);
        let args = to_bytes(args);
        self.commands.push(Command::evalsha(definition.sha1(), &keys, &args));
        self.slots.push(Slot::Script { definition, keys, args });
        Ok(self)
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns true if the pipeline runs atomically.
    pub fn is_transaction(&self) -> bool {
        self.transaction
    }

    /// Discards every queued command.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.slots.clear();
    }

    /// Sends the queue and returns one result per queued command, in order.
    ///
    /// With `load_script`, the backend is first asked which queued scripts
    /// it has cached; the others are sent by source in place of their hash,
    /// so every slot still runs in submission order inside the same batch.
    /// Without it, cold script slots keep their
    /// [`Error::NoScript`](crate::Error::NoScript). The queue is empty
    /// afterwards.
    pub fn execute(&mut self, load_script: bool) -> Result<Vec<Result<Reply>>> {
        let mut commands = std::mem::take(&mut self.commands);
        let slots = std::mem::take(&mut self.slots);
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        if load_script {
            self.load_missing(&mut commands, &slots)?;
        }

        let results = self.client.execute_pipeline(&commands, self.transaction)?;
        Ok(slots
            .iter()
            .zip(results)
            .map(|(slot, result)| match (slot, result) {
                (Slot::Script { definition, args, .. }, Ok(reply)) => {
                    definition.apply_callback(reply, args)
                }
                (_, result) => result,
            })
            .collect())
    }

    /// Swaps `EVALSHA` for `EVAL` on every script slot the backend lacks.
    fn load_missing(&self, commands: &mut [Command], slots: &[Slot]) -> Result<()> {
        let mut hashes: Vec<&str> = slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Script { definition, .. } => Some(definition.sha1()),
                Slot::Command => None,
            })
            .collect();
        hashes.sort_unstable();
        hashes.dedup();
        if hashes.is_empty() {
            return Ok(());
        }

        let exists = self.client.execute(&Command::new("SCRIPT").arg("EXISTS").args(&hashes))?;
        let cached: HashSet<&str> = hashes
            .iter()
            .zip(exists.into_array())
            .filter(|(_, flag)| flag.as_int() == Some(1))
            .map(|(sha, _)| *sha)
            .collect();

        let mut loaded = 0usize;
        for (command, slot) in commands.iter_mut().zip(slots) {
            if let Slot::Script { definition, keys, args } = slot {
                if !cached.contains(definition.sha1()) {
                    *command = Command::eval(definition.source(), keys, args);
                    loaded += 1;
                }
            }
        }
        if loaded > 0 {
            log::debug!("pipeline: sending {} script call(s) by source on {}", loaded, self.client);
        }
        Ok(())
    }
}
