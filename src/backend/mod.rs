//! The key-value store collaborator consumed by the object mapper.
//!
//! A [`Backend`] executes [`Command`]s and answers with [`Reply`] values.
//! Every call to [`Backend::execute`] or [`Backend::execute_pipeline`] is one
//! physical round trip; the [`Client`](crate::Client) layered on top relies
//! on that to emit exactly one notification per trip.
//!
//! The crate ships [`MemoryBackend`], an in-process store with an embedded
//! Lua 5.4 interpreter for server-side scripts.

pub mod command;
pub mod memory;

pub use command::{Command, Reply};
pub use memory::MemoryBackend;

use crate::Result;
use bytes::Bytes;

/// A connection to a Redis-like key-value store.
///
/// Implementations must be safe to share between threads; the object mapper
/// hands the same backend to every manager registered against it.
pub trait Backend: Send + Sync {
    /// Identity of the underlying database. Two backends with the same
    /// connection string are considered the same database.
    fn connection_string(&self) -> &str;

    /// Executes a single command in one round trip.
    fn execute(&self, command: &Command) -> Result<Reply>;

    /// Executes a batch of commands in one round trip.
    ///
    /// The outer `Result` fails only if the batch could not be sent at all;
    /// per-command failures are reported in their slot. When `transaction` is
    /// true the batch runs atomically (MULTI/EXEC semantics).
    fn execute_pipeline(
        &self,
        commands: &[Command],
        transaction: bool,
    ) -> Result<Vec<Result<Reply>>>;

    /// Executes a server-side script either by content hash or by full source.
    ///
    /// A by-hash call against a cold script cache fails with
    /// [`Error::NoScript`](crate::Error::NoScript).
    fn execute_script(
        &self,
        hash_or_source: &str,
        is_hash: bool,
        keys: &[Bytes],
        args: &[Bytes],
    ) -> Result<Reply> {
        let command = if is_hash {
            Command::evalsha(hash_or_source, keys, args)
        } else {
            Command::eval(hash_or_source, keys, args)
        };
        self.execute(&command)
    }

    /// Drops every script from the backend script cache.
    fn flush_scripts(&self) -> Result<bool> {
        Ok(self.execute(&Command::new("SCRIPT").arg("FLUSH"))?.as_bool())
    }
}
