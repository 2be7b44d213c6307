//! Named server-side script definitions.
//!
//! A [`ScriptDefinition`] is identified remotely by the SHA-1 of its source.
//! The hash is a pure function of the concatenated source fragments, so every
//! process computes the same value and agrees on whether the backend script
//! cache already holds the script.

use crate::backend::Reply;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Result-transforming callback applied to a script's raw reply. It also
/// receives the `ARGV` the script was called with.
pub type ScriptCallback = Arc<dyn Fn(Reply, &[Bytes]) -> Result<Reply> + Send + Sync>;

/// Lowercase hex SHA-1 of `source`, the identity the backend caches scripts by.
///
/// # Example
///
/// ```
/// use kvodm::script::script_sha1;
///
/// assert_eq!(script_sha1("return 1"), "e0e1f9fabfc9d4800c877a703b823ac0578ff8db");
/// ```
pub fn script_sha1(source: &str) -> String {
    let digest = Sha1::digest(source.as_bytes());
    let mut hex = String::with_capacity(40);
    for byte in digest.iter() {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// A named piece of server-side Lua.
#[derive(Clone)]
pub struct ScriptDefinition {
    name: String,
    source: String,
    sha1: String,
    callback: Option<ScriptCallback>,
}

impl ScriptDefinition {
    /// Creates a definition from one or more source fragments, concatenated
    /// in order. Fragment boundaries carry no meaning.
    pub fn new<I, S>(name: impl Into<String>, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let source: String = parts.into_iter().map(|p| p.as_ref().to_string()).collect();
        let sha1 = script_sha1(&source);
        Self { name: name.into(), source, sha1, callback: None }
    }

    /// Attaches a result-transforming callback.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Reply, &[Bytes]) -> Result<Reply> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// The script name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The content hash.
    pub fn sha1(&self) -> &str {
        &self.sha1
    }

    /// Returns true if a callback is attached.
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Applies the callback, if any, to a raw reply.
    pub fn apply_callback(&self, reply: Reply, args: &[Bytes]) -> Result<Reply> {
        match &self.callback {
            Some(callback) => callback(reply, args),
            None => Ok(reply),
        }
    }
}

impl fmt::Debug for ScriptDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptDefinition")
            .field("name", &self.name)
            .field("sha1", &self.sha1)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Registry of named scripts, shared by every client using it.
///
/// # Example
///
/// ```
/// use kvodm::script::{ScriptDefinition, ScriptRegistry};
///
/// # fn main() -> Result<(), kvodm::Error> {
/// let registry = ScriptRegistry::new();
/// registry.register(ScriptDefinition::new("answer", ["return ", "42"]));
/// assert_eq!(registry.get("answer")?.source(), "return 42");
/// assert!(registry.get("missing").is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ScriptRegistry {
    scripts: RwLock<HashMap<String, Arc<ScriptDefinition>>>,
}

impl ScriptRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the builtin scripts.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for definition in super::builtin::definitions() {
            registry.register(definition);
        }
        registry
    }

    /// Registers a script. An existing script of the same name is replaced.
    pub fn register(&self, definition: ScriptDefinition) -> Arc<ScriptDefinition> {
        let definition = Arc::new(definition);
        let previous =
            self.scripts.write().insert(definition.name.clone(), Arc::clone(&definition));
        if let Some(previous) = previous {
            log::debug!(
                "script '{}' replaced ({} -> {})",
                definition.name,
                previous.sha1,
                definition.sha1
            );
        }
        definition
    }

    /// Looks up a script by name.
    pub fn get(&self, name: &str) -> Result<Arc<ScriptDefinition>> {
        self.scripts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("script '{}' is not registered", name)))
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.scripts.read().contains_key(name)
    }

    /// Registered script names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scripts.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered scripts.
    pub fn len(&self) -> usize {
        self.scripts.read().len()
    }

    /// Returns true if no script is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRegistry").field("scripts", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fragments_are_concatenated() {
        let def = ScriptDefinition::new("s", ["local a = 1\n", "return a"]);
        assert_eq!(def.source(), "local a = 1\nreturn a");
        assert_eq!(def.sha1(), script_sha1("local a = 1\nreturn a"));
        assert_eq!(def.sha1().len(), 40);
    }

    #[test]
    fn test_register_overwrites() {
        let registry = ScriptRegistry::new();
        registry.register(ScriptDefinition::new("s", ["return 1"]));
        registry.register(ScriptDefinition::new("s", ["return 2"]));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("s").unwrap().source(), "return 2");
    }

    #[test]
    fn test_get_unknown() {
        let registry = ScriptRegistry::new();
        assert!(matches!(registry.get("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_builtins() {
        let registry = ScriptRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["delpattern", "move2set", "zpop"]);
    }

    #[test]
    fn test_callback() {
        let def = ScriptDefinition::new("count", ["return {1,2,3}"])
            .with_callback(|reply, _args| Ok(Reply::Integer(reply.into_array().len() as i64)));
        assert!(def.has_callback());
        let reply = def.apply_callback(Reply::Array(vec![Reply::Nil, Reply::Nil]), &[]).unwrap();
        assert_eq!(reply, Reply::Integer(2));
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic(source in ".{0,64}") {
            prop_assert_eq!(script_sha1(&source), script_sha1(&source));
        }

        #[test]
        fn prop_split_point_does_not_matter(source in "[a-z ]{0,64}", split in 0usize..64) {
            let split = split.min(source.len());
            let (head, tail) = source.split_at(split);
            let def = ScriptDefinition::new("s", [head, tail]);
            prop_assert_eq!(def.sha1(), script_sha1(&source));
        }

        #[test]
        fn prop_distinct_sources_distinct_hashes(a in "[a-z]{1,32}", b in "[a-z]{1,32}") {
            prop_assume!(a != b);
            prop_assert_ne!(script_sha1(&a), script_sha1(&b));
        }
    }
}
