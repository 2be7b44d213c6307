//! Lua engine running server-side scripts against the in-process keyspace.
//!
//! Scripts see the Redis scripting environment: `KEYS` and `ARGV` tables and
//! a `redis` table with `call`, `pcall`, `status_reply` and `error_reply`.
//! Values cross the boundary with the usual conversion rules:
//!
//! ```text
//! Reply            Lua
//! -----            ---
//! Integer    <->   number
//! Bulk       <->   string
//! Nil        <->   false (nil when returned)
//! Array      <->   sequence table
//! Status     <->   { ok = "..." }
//! error      <->   { err = "..." }
//! ```
//!
//! The keyspace is moved into the interpreter for the duration of a script
//! and moved back once the interpreter is dropped, so a script runs with
//! exclusive access to the data. Writes made before a failure are kept.

use super::store::Store;
use crate::backend::{Command, Reply};
use crate::{Error, Result};
use bytes::Bytes;
use mlua::{Lua, Value, Variadic};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executes Lua scripts with access to a [`Store`].
pub(crate) struct LuaEngine {
    /// Maximum script execution time
    timeout: Option<Duration>,
}

/// The `redis` table exposed to scripts
struct RedisApi;

impl RedisApi {
    fn create_api_table(lua: &Lua, store: Arc<Mutex<Store>>) -> mlua::Result<mlua::Table<'_>> {
        let table = lua.create_table()?;

        let call_store = Arc::clone(&store);
        let call_fn = lua.create_function(move |lua, args: Variadic<Value<'_>>| {
            let command = command_from_lua(&args)?;
            let reply = call_store
                .lock()
                .dispatch(&command)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            reply_to_lua(lua, reply)
        })?;
        table.set("call", call_fn)?;

        let pcall_store = Arc::clone(&store);
        let pcall_fn = lua.create_function(move |lua, args: Variadic<Value<'_>>| {
            let outcome = command_from_lua(&args)
                .map_err(|e| e.to_string())
                .and_then(|command| {
                    pcall_store.lock().dispatch(&command).map_err(|e| e.to_string())
                });
            match outcome {
                Ok(reply) => reply_to_lua(lua, reply),
                Err(message) => single_field_table(lua, "err", &message),
            }
        })?;
        table.set("pcall", pcall_fn)?;

        let status_fn = lua.create_function(|lua, status: mlua::String<'_>| {
            single_field_table(lua, "ok", status.to_str()?)
        })?;
        table.set("status_reply", status_fn)?;

        let error_fn = lua.create_function(|lua, message: mlua::String<'_>| {
            single_field_table(lua, "err", message.to_str()?)
        })?;
        table.set("error_reply", error_fn)?;

        Ok(table)
    }
}

impl LuaEngine {
    /// Creates a new engine with an optional per-script timeout.
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Evaluates `source` with the given `KEYS` and `ARGV`.
    ///
    /// Script errors are reported as [`Error::Response`]; a script returning
    /// an `{err = ...}` table yields that message unchanged.
    pub(crate) fn eval(
        &self,
        store: &mut Store,
        source: &str,
        keys: &[Bytes],
        args: &[Bytes],
    ) -> Result<Reply> {
        let start_time = Instant::now();

        let shared = Arc::new(Mutex::new(std::mem::take(store)));
        let result = self.run(Arc::clone(&shared), source, keys, args);

        // The interpreter (and every callback holding a clone) is gone here.
        *store = match Arc::try_unwrap(shared) {
            Ok(inner) => inner.into_inner(),
            Err(_) => return Err(Error::internal("script engine still holds the keyspace")),
        };

        match &result {
            Ok(_) => log::debug!("Lua script executed successfully in {:?}", start_time.elapsed()),
            Err(e) => log::warn!("Lua script failed: {}", e),
        }
        result
    }

    fn run(
        &self,
        store: Arc<Mutex<Store>>,
        source: &str,
        keys: &[Bytes],
        args: &[Bytes],
    ) -> Result<Reply> {
        let lua = Lua::new();

        if let Some(timeout) = self.timeout {
            let timeout_start = Instant::now();
            lua.set_hook(
                mlua::HookTriggers { every_nth_instruction: Some(1000), ..Default::default() },
                move |_lua, _debug| {
                    if timeout_start.elapsed() > timeout {
                        Err(mlua::Error::RuntimeError("Script execution timeout".to_string()))
                    } else {
                        Ok(())
                    }
                },
            );
        }

        let result = (|| -> mlua::Result<Reply> {
            let globals = lua.globals();
            globals.set("KEYS", bytes_table(&lua, keys)?)?;
            globals.set("ARGV", bytes_table(&lua, args)?)?;
            globals.set("redis", RedisApi::create_api_table(&lua, store)?)?;

            let value = lua.load(source).eval::<Value<'_>>()?;
            lua_to_reply(value)
        })();

        result.map_err(script_error)
    }
}

fn bytes_table<'lua>(lua: &'lua Lua, items: &[Bytes]) -> mlua::Result<mlua::Table<'lua>> {
    let table = lua.create_table()?;
    for (i, item) in items.iter().enumerate() {
        table.raw_set(i + 1, lua.create_string(&item[..])?)?;
    }
    Ok(table)
}

fn single_field_table<'lua>(lua: &'lua Lua, field: &str, text: &str) -> mlua::Result<Value<'lua>> {
    let table = lua.create_table()?;
    table.set(field, text)?;
    Ok(Value::Table(table))
}

fn command_from_lua(args: &[Value<'_>]) -> mlua::Result<Command> {
    let mut parts = args.iter().map(|value| match value {
        Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
        Value::Integer(n) => Ok(Bytes::from(n.to_string())),
        Value::Number(n) if n.fract() == 0.0 => Ok(Bytes::from((*n as i64).to_string())),
        Value::Number(n) => Ok(Bytes::from(n.to_string())),
        _ => Err(mlua::Error::RuntimeError(
            "Lua redis() command arguments must be strings or integers".to_string(),
        )),
    });

    let name = match parts.next() {
        Some(name) => name?,
        None => {
            return Err(mlua::Error::RuntimeError(
                "Please specify at least one argument for redis.call()".to_string(),
            ))
        }
    };
    let name = String::from_utf8_lossy(&name).into_owned();
    let rest = parts.collect::<mlua::Result<Vec<Bytes>>>()?;
    Ok(Command::new(&name).bytes_args(rest))
}

fn reply_to_lua(lua: &Lua, reply: Reply) -> mlua::Result<Value<'_>> {
    Ok(match reply {
        Reply::Nil => Value::Boolean(false),
        Reply::Integer(n) => Value::Integer(n),
        Reply::Bulk(b) => Value::String(lua.create_string(&b[..])?),
        Reply::Status(s) => single_field_table(lua, "ok", &s)?,
        Reply::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.into_iter().enumerate() {
                table.raw_set(i + 1, reply_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

fn lua_to_reply(value: Value<'_>) -> mlua::Result<Reply> {
    Ok(match value {
        Value::Nil | Value::Boolean(false) => Reply::Nil,
        Value::Boolean(true) => Reply::Integer(1),
        Value::Integer(n) => Reply::Integer(n),
        Value::Number(n) => Reply::Integer(n as i64),
        Value::String(s) => Reply::Bulk(Bytes::copy_from_slice(s.as_bytes())),
        Value::Table(table) => {
            if let Value::String(message) = table.raw_get::<_, Value<'_>>("err")? {
                let message = message.to_str()?.to_string();
                return Err(mlua::Error::external(Error::response(message)));
            }
            if let Value::String(status) = table.raw_get::<_, Value<'_>>("ok")? {
                return Ok(Reply::Status(status.to_str()?.to_string()));
            }
            let mut items = Vec::new();
            for i in 1..=table.raw_len() {
                let item: Value<'_> = table.raw_get(i)?;
                if matches!(item, Value::Nil) {
                    break;
                }
                items.push(lua_to_reply(item)?);
            }
            Reply::Array(items)
        }
        _ => Reply::Nil,
    })
}

fn script_error(err: mlua::Error) -> Error {
    if let mlua::Error::ExternalError(inner) = &err {
        if let Some(reply_error) = inner.downcast_ref::<Error>() {
            return reply_error.clone();
        }
    }
    Error::response(format!("ERR Error running script: {}", err))
}
