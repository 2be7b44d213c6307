//! Server-side scripts.
//!
//! Scripts are registered once by name in a [`ScriptRegistry`] and executed
//! through [`Client::script_call`](crate::Client::script_call), which runs
//! them by content hash and transparently falls back to sending the full
//! source when the backend script cache is cold.
//!
//! # Example
//!
//! ```
//! use kvodm::{Client, ScriptDefinition};
//!
//! # fn main() -> Result<(), kvodm::Error> {
//! let client = Client::open("memory://script-docs")?;
//! client.scripts().register(ScriptDefinition::new("double", ["return ARGV[1] * 2"]));
//!
//! let reply = client.script_call("double", &[] as &[&str], &["21"])?;
//! assert_eq!(reply.as_int(), Some(42));
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod registry;

pub use registry::{script_sha1, ScriptCallback, ScriptDefinition, ScriptRegistry};
