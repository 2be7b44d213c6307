//! Keyspace and command implementations of the in-process backend.

use crate::backend::{Command, Reply};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Command names the keyspace understands, script commands included.
pub(crate) const KNOWN_COMMANDS: &[&str] = &[
    "PING", "GET", "SET", "MSET", "DEL", "EXISTS", "TYPE", "KEYS", "INCR", "FLUSHDB", "SADD",
    "SREM", "SMEMBERS", "SCARD", "SISMEMBER", "LPUSH", "RPUSH", "LRANGE", "LLEN", "ZADD", "ZRANGE",
    "ZCARD", "ZREM", "HSET", "HGET", "HMGET", "HGETALL", "HDEL", "EVAL", "EVALSHA", "SCRIPT",
];

/// A stored value.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    ZSet(HashMap<Bytes, f64>),
    Hash(HashMap<Bytes, Bytes>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::ZSet(_) => "zset",
            Value::Hash(_) => "hash",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
            Value::Hash(h) => h.is_empty(),
        }
    }
}

/// The keyspace. Not synchronized; the backend wraps it in a lock.
#[derive(Debug, Default)]
pub(crate) struct Store {
    data: HashMap<Bytes, Value>,
}

macro_rules! typed_access {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        fn $get(&self, key: &Bytes) -> Result<Option<&$ty>> {
            match self.data.get(key) {
                None => Ok(None),
                Some(Value::$variant(v)) => Ok(Some(v)),
                Some(_) => Err(Error::response(WRONGTYPE)),
            }
        }

        fn $get_mut(&mut self, key: &Bytes) -> Result<&mut $ty> {
            match self
                .data
                .entry(key.clone())
                .or_insert_with(|| Value::$variant(Default::default()))
            {
                Value::$variant(v) => Ok(v),
                _ => Err(Error::response(WRONGTYPE)),
            }
        }
    };
}

impl Store {
    typed_access!(list, list_mut, List, VecDeque<Bytes>);
    typed_access!(set, set_mut, Set, HashSet<Bytes>);
    typed_access!(zset, zset_mut, ZSet, HashMap<Bytes, f64>);
    typed_access!(hash, hash_mut, Hash, HashMap<Bytes, Bytes>);

    /// Number of keys.
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Executes one keyspace command.
    pub(crate) fn dispatch(&mut self, cmd: &Command) -> Result<Reply> {
        let args = cmd.args_slice();
        match cmd.name() {
            "PING" => Ok(Reply::Status("PONG".to_string())),
            "GET" => {
                arity(cmd, 1, 1)?;
                match self.data.get(&args[0]) {
                    None => Ok(Reply::Nil),
                    Some(Value::String(v)) => Ok(Reply::Bulk(v.clone())),
                    Some(_) => Err(Error::response(WRONGTYPE)),
                }
            }
            "SET" => {
                arity(cmd, 2, 2)?;
                self.data.insert(args[0].clone(), Value::String(args[1].clone()));
                Ok(Reply::ok())
            }
            "MSET" => {
                arity(cmd, 2, usize::MAX)?;
                if args.len() % 2 != 0 {
                    return Err(wrong_arity(cmd));
                }
                for pair in args.chunks(2) {
                    self.data.insert(pair[0].clone(), Value::String(pair[1].clone()));
                }
                Ok(Reply::ok())
            }
            "DEL" => {
                arity(cmd, 1, usize::MAX)?;
                let removed = args.iter().filter(|k| self.data.remove(*k).is_some()).count();
                Ok(Reply::Integer(removed as i64))
            }
            "EXISTS" => {
                arity(cmd, 1, usize::MAX)?;
                let found = args.iter().filter(|k| self.data.contains_key(*k)).count();
                Ok(Reply::Integer(found as i64))
            }
            "TYPE" => {
                arity(cmd, 1, 1)?;
                let name = self.data.get(&args[0]).map_or("none", Value::type_name);
                Ok(Reply::Status(name.to_string()))
            }
            "KEYS" => {
                arity(cmd, 1, 1)?;
                let mut keys: Vec<&Bytes> =
                    self.data.keys().filter(|k| glob_match(&args[0], k)).collect();
                keys.sort();
                Ok(Reply::Array(keys.into_iter().map(|k| Reply::Bulk(k.clone())).collect()))
            }
            "INCR" => {
                arity(cmd, 1, 1)?;
                let current = match self.data.get(&args[0]) {
                    None => 0,
                    Some(Value::String(v)) => parse_int(v)?,
                    Some(_) => return Err(Error::response(WRONGTYPE)),
                };
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| Error::response("ERR increment or decrement would overflow"))?;
                self.data.insert(args[0].clone(), Value::String(Bytes::from(next.to_string())));
                Ok(Reply::Integer(next))
            }
            "FLUSHDB" => {
                self.data.clear();
                Ok(Reply::ok())
            }
            "SADD" => {
                arity(cmd, 2, usize::MAX)?;
                let set = self.set_mut(&args[0])?;
                let added = args[1..].iter().filter(|m| set.insert((*m).clone())).count();
                Ok(Reply::Integer(added as i64))
            }
            "SREM" => {
                arity(cmd, 2, usize::MAX)?;
                let removed = if self.set(&args[0])?.is_some() {
                    let set = self.set_mut(&args[0])?;
                    args[1..].iter().filter(|m| set.remove(*m)).count()
                } else {
                    0
                };
                self.remove_if_empty(&args[0]);
                Ok(Reply::Integer(removed as i64))
            }
            "SMEMBERS" => {
                arity(cmd, 1, 1)?;
                let mut members: Vec<Bytes> =
                    self.set(&args[0])?.into_iter().flatten().cloned().collect();
                members.sort();
                Ok(Reply::Array(members.into_iter().map(Reply::Bulk).collect()))
            }
            "SCARD" => {
                arity(cmd, 1, 1)?;
                Ok(Reply::Integer(self.set(&args[0])?.map_or(0, HashSet::len) as i64))
            }
            "SISMEMBER" => {
                arity(cmd, 2, 2)?;
                let found = self.set(&args[0])?.is_some_and(|s| s.contains(&args[1]));
                Ok(Reply::Integer(found as i64))
            }
            "LPUSH" | "RPUSH" => {
                arity(cmd, 2, usize::MAX)?;
                let front = cmd.name() == "LPUSH";
                let list = self.list_mut(&args[0])?;
                for item in &args[1..] {
                    if front {
                        list.push_front(item.clone());
                    } else {
                        list.push_back(item.clone());
                    }
                }
                Ok(Reply::Integer(list.len() as i64))
            }
            "LRANGE" => {
                arity(cmd, 3, 3)?;
                let (start, stop) = (parse_int(&args[1])?, parse_int(&args[2])?);
                let items = match self.list(&args[0])? {
                    None => Vec::new(),
                    Some(list) => match normalize_range(start, stop, list.len()) {
                        None => Vec::new(),
                        Some((lo, hi)) => list.range(lo..=hi).cloned().map(Reply::Bulk).collect(),
                    },
                };
                Ok(Reply::Array(items))
            }
            "LLEN" => {
                arity(cmd, 1, 1)?;
                Ok(Reply::Integer(self.list(&args[0])?.map_or(0, VecDeque::len) as i64))
            }
            "ZADD" => {
                arity(cmd, 3, usize::MAX)?;
                if (args.len() - 1) % 2 != 0 {
                    return Err(wrong_arity(cmd));
                }
                let pairs = args[1..]
                    .chunks(2)
                    .map(|pair| Ok((parse_float(&pair[0])?, pair[1].clone())))
                    .collect::<Result<Vec<_>>>()?;
                let zset = self.zset_mut(&args[0])?;
                let added = pairs
                    .into_iter()
                    .filter(|(score, member)| zset.insert(member.clone(), *score).is_none())
                    .count();
                Ok(Reply::Integer(added as i64))
            }
            "ZRANGE" => {
                arity(cmd, 3, 4)?;
                let (start, stop) = (parse_int(&args[1])?, parse_int(&args[2])?);
                let with_scores = match args.get(3) {
                    None => false,
                    Some(flag) if flag.eq_ignore_ascii_case(b"WITHSCORES") => true,
                    Some(_) => return Err(Error::response("ERR syntax error")),
                };
                let mut entries: Vec<(&Bytes, f64)> = match self.zset(&args[0])? {
                    None => Vec::new(),
                    Some(zset) => zset.iter().map(|(m, s)| (m, *s)).collect(),
                };
                entries.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                let mut items = Vec::new();
                if let Some((lo, hi)) = normalize_range(start, stop, entries.len()) {
                    for (member, score) in &entries[lo..=hi] {
                        items.push(Reply::Bulk((*member).clone()));
                        if with_scores {
                            items.push(Reply::bulk(format_score(*score)));
                        }
                    }
                }
                Ok(Reply::Array(items))
            }
            "ZCARD" => {
                arity(cmd, 1, 1)?;
                Ok(Reply::Integer(self.zset(&args[0])?.map_or(0, HashMap::len) as i64))
            }
            "ZREM" => {
                arity(cmd, 2, usize::MAX)?;
                let removed = if self.zset(&args[0])?.is_some() {
                    let zset = self.zset_mut(&args[0])?;
                    args[1..].iter().filter(|m| zset.remove(*m).is_some()).count()
                } else {
                    0
                };
                self.remove_if_empty(&args[0]);
                Ok(Reply::Integer(removed as i64))
            }
            "HSET" => {
                arity(cmd, 3, usize::MAX)?;
                if (args.len() - 1) % 2 != 0 {
                    return Err(wrong_arity(cmd));
                }
                let hash = self.hash_mut(&args[0])?;
                let added = args[1..]
                    .chunks(2)
                    .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                    .count();
                Ok(Reply::Integer(added as i64))
            }
            "HGET" => {
                arity(cmd, 2, 2)?;
                let value = self.hash(&args[0])?.and_then(|h| h.get(&args[1]).cloned());
                Ok(value.map_or(Reply::Nil, Reply::Bulk))
            }
            "HMGET" => {
                arity(cmd, 2, usize::MAX)?;
                let hash = self.hash(&args[0])?;
                let values = args[1..]
                    .iter()
                    .map(|f| hash.and_then(|h| h.get(f).cloned()).map_or(Reply::Nil, Reply::Bulk))
                    .collect();
                Ok(Reply::Array(values))
            }
            "HGETALL" => {
                arity(cmd, 1, 1)?;
                let mut fields: Vec<(&Bytes, &Bytes)> =
                    self.hash(&args[0])?.into_iter().flatten().collect();
                fields.sort();
                let mut items = Vec::with_capacity(fields.len() * 2);
                for (field, value) in fields {
                    items.push(Reply::Bulk(field.clone()));
                    items.push(Reply::Bulk(value.clone()));
                }
                Ok(Reply::Array(items))
            }
            "HDEL" => {
                arity(cmd, 2, usize::MAX)?;
                let removed = if self.hash(&args[0])?.is_some() {
                    let hash = self.hash_mut(&args[0])?;
                    args[1..].iter().filter(|f| hash.remove(*f).is_some()).count()
                } else {
                    0
                };
                self.remove_if_empty(&args[0]);
                Ok(Reply::Integer(removed as i64))
            }
            "EVAL" | "EVALSHA" | "SCRIPT" => {
                Err(Error::response("ERR This Redis command is not allowed from scripts"))
            }
            other => Err(Error::response(format!("ERR unknown command '{}'", other))),
        }
    }

    fn remove_if_empty(&mut self, key: &Bytes) {
        if self.data.get(key).is_some_and(Value::is_empty) {
            self.data.remove(key);
        }
    }
}

fn arity(cmd: &Command, min: usize, max: usize) -> Result<()> {
    let n = cmd.args_slice().len();
    if n < min || n > max {
        return Err(wrong_arity(cmd));
    }
    Ok(())
}

fn wrong_arity(cmd: &Command) -> Error {
    Error::response(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd.name().to_ascii_lowercase()
    ))
}

pub(crate) fn parse_int(arg: &[u8]) -> Result<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::response("ERR value is not an integer or out of range"))
}

fn parse_float(arg: &[u8]) -> Result<f64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or_else(|| Error::response("ERR value is not a valid float"))
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{}", score)
    }
}

/// Resolves inclusive `start..=stop` indexes (negative counts from the end).
fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Glob-style matching used by `KEYS`: `*`, `?`, `[...]` classes and `\` escapes.
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => match match_class(&pattern[p..], text[t]) {
                    Some((true, width)) => {
                        p += width;
                        t += 1;
                        continue;
                    }
                    Some((false, _)) => {}
                    None => {
                        if text[t] == b'[' {
                            p += 1;
                            t += 1;
                            continue;
                        }
                    }
                },
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }
        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                t = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Matches `ch` against the class starting at `pattern[0] == b'['`.
/// Returns whether it matched and the width of the class, or None when the
/// class is unterminated.
fn match_class(pattern: &[u8], ch: u8) -> Option<(bool, usize)> {
    let mut i = 1;
    let negate = pattern.get(1) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < pattern.len() {
        let c = pattern[i];
        if c == b']' {
            return Some((matched != negate, i + 1));
        }
        if c == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == ch;
            i += 2;
            continue;
        }
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = (c.min(pattern[i + 2]), c.max(pattern[i + 2]));
            matched |= (lo..=hi).contains(&ch);
            i += 3;
            continue;
        }
        matched |= c == ch;
        i += 1;
    }
    None
}
