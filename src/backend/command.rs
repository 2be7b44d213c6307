//! Command frames sent to a backend and the replies it answers with.

use bytes::Bytes;
use std::fmt;

/// A single command: an upper-case name plus binary-safe arguments.
///
/// # Example
///
/// ```
/// use kvodm::backend::Command;
///
/// let cmd = Command::new("sadd").arg("foo").arg("1").arg("2");
/// assert_eq!(cmd.name(), "SADD");
/// assert_eq!(cmd.args_slice().len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    /// Creates a command with no arguments.
    pub fn new(name: &str) -> Self {
        Self { name: name.to_ascii_uppercase(), args: Vec::new() }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// Appends every argument yielded by `args`.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.args.extend(args.into_iter().map(|a| Bytes::copy_from_slice(a.as_ref())));
        self
    }

    /// Appends pre-built byte arguments without copying.
    pub fn bytes_args(mut self, args: impl IntoIterator<Item = Bytes>) -> Self {
        self.args.extend(args);
        self
    }

    /// The command name, upper-cased.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The command arguments.
    pub fn args_slice(&self) -> &[Bytes] {
        &self.args
    }

    /// Builds `EVALSHA sha numkeys keys... args...`.
    pub fn evalsha(sha: &str, keys: &[Bytes], args: &[Bytes]) -> Self {
        Self::script_frame("EVALSHA", sha, keys, args)
    }

    /// Builds `EVAL source numkeys keys... args...`.
    pub fn eval(source: &str, keys: &[Bytes], args: &[Bytes]) -> Self {
        Self::script_frame("EVAL", source, keys, args)
    }

    fn script_frame(name: &str, body: &str, keys: &[Bytes], args: &[Bytes]) -> Self {
        Self::new(name)
            .arg(body)
            .arg(keys.len().to_string())
            .bytes_args(keys.iter().cloned())
            .bytes_args(args.iter().cloned())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

/// A reply from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Missing value.
    Nil,
    /// Integer reply.
    Integer(i64),
    /// Simple status reply such as `OK` or a type name.
    Status(String),
    /// Binary-safe bulk string.
    Bulk(Bytes),
    /// Multi-bulk reply.
    Array(Vec<Reply>),
}

impl Reply {
    /// Shorthand for the `OK` status.
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Builds a bulk reply from anything byte-like.
    pub fn bulk(value: impl AsRef<[u8]>) -> Self {
        Reply::Bulk(Bytes::copy_from_slice(value.as_ref()))
    }

    /// Returns true for [`Reply::Nil`].
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Interprets the reply as an integer. Bulk strings holding a number are
    /// accepted the way clients usually coerce them.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            Reply::Bulk(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// Interprets the reply as a boolean (`OK`, non-zero integers).
    pub fn as_bool(&self) -> bool {
        match self {
            Reply::Integer(n) => *n != 0,
            Reply::Status(s) => s == "OK",
            Reply::Bulk(_) | Reply::Array(_) => true,
            Reply::Nil => false,
        }
    }

    /// Interprets the reply as UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Bulk(b) => std::str::from_utf8(b).ok(),
            Reply::Status(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the items of an array reply; any other reply yields an empty vec.
    pub fn into_array(self) -> Vec<Reply> {
        match self {
            Reply::Array(items) => items,
            Reply::Nil => Vec::new(),
            other => vec![other],
        }
    }

    /// Collects an array of bulk strings into owned strings, skipping nils.
    pub fn into_strings(self) -> Vec<String> {
        self.into_array()
            .into_iter()
            .filter_map(|r| match r {
                Reply::Bulk(b) => Some(String::from_utf8_lossy(&b).into_owned()),
                Reply::Status(s) => Some(s),
                Reply::Integer(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()
    }
}
