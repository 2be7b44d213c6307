//! # kvodm - An Object Data Mapper for Redis-like Key-Value Stores
//!
//! kvodm maps statically described models onto the sets and hashes of a
//! Redis-like key-value store, and extends the store with atomic multi-key
//! operations written as server-side Lua scripts.
//!
//! ## Architecture
//!
//! - **Backend**: the store itself, reached through [`backend::Backend`].
//!   [`backend::MemoryBackend`] is an in-process implementation with an
//!   embedded Lua 5.4 interpreter
//! - **Client**: a handle on a backend with a key namespace, a script
//!   registry and a per-round-trip notification channel
//! - **Scripts**: named Lua sources, called by content hash with automatic
//!   fallback to the full source when the backend has not cached them
//! - **Pipeline**: batches commands and script calls into one round trip
//! - **ODM**: [`odm::Router`], [`odm::Manager`], [`odm::Session`] and
//!   [`odm::Query`]
//!
//! ## Example Usage
//!
//! ```rust
//! use kvodm::odm::{FieldMeta, Instance, Model, ModelMeta, Router, RouterOptions};
//! use kvodm::Client;
//!
//! static AUTHOR_FIELDS: [FieldMeta; 1] = [FieldMeta::new("name")];
//! static AUTHOR: ModelMeta = ModelMeta::new("library", "author").fields(&AUTHOR_FIELDS);
//!
//! # fn main() -> Result<(), kvodm::Error> {
//! // Connect and register a model
//! let client = Client::open("memory://library?namespace=lib:")?;
//! let mut router = Router::new(RouterOptions::new().default_backend(client.clone()));
//! router.register(Model::of(&AUTHOR), None, true)?;
//!
//! // Write through a session
//! let mut session = router.session(&[])?.expect("a registered model");
//! session.add(Instance::new(Model::of(&AUTHOR)).set("name", "Calvino"))?;
//! session.commit()?;
//!
//! // Read back
//! let names = router.query(Model::of(&AUTHOR))?.get_field("name")?.values()?;
//! assert_eq!(names, vec!["Calvino"]);
//!
//! // Server-side scripts
//! let removed = client.script_call("delpattern", &[] as &[&str], &["lib:*"])?;
//! assert_eq!(removed.as_int(), Some(3));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod odm;
pub mod pipeline;
pub mod script;

// Re-exports
pub use backend::{Backend, Command, MemoryBackend, Reply};
pub use client::{Client, CommandEvent};
pub use config::{ConnectionInfo, Options};
pub use error::{Error, Result};
pub use odm::{Instance, Manager, Model, ModelMeta, Query, Router, RouterOptions, Session};
pub use pipeline::Pipeline;
pub use script::{ScriptDefinition, ScriptRegistry};
