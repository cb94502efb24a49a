//! The set of store commands accepted for direct dispatch, and decoding of
//! their replies

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use redis::Value;
use regex::Regex;
use serde::Serialize;

use crate::error::SandboxError;

/// How a command's reply is shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Decoded structurally as the server sent it
    Plain,
    /// Flat field/value array folded into a map
    Pairs,
}

/// Store commands with a typed direct-dispatch handler.
///
/// Anything not listed here is rejected before reaching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCommand {
    Append,
    DbSize,
    Decr,
    DecrBy,
    Del,
    Echo,
    Exists,
    Expire,
    FlushDb,
    Get,
    GetRange,
    GetSet,
    HDel,
    HExists,
    HGet,
    HGetAll,
    HIncrBy,
    HKeys,
    HLen,
    HMGet,
    HSet,
    HVals,
    Incr,
    IncrBy,
    IncrByFloat,
    Keys,
    LIndex,
    LLen,
    LPop,
    LPush,
    LRange,
    LRem,
    LSet,
    LTrim,
    MGet,
    MSet,
    Persist,
    PExpire,
    Ping,
    PTtl,
    Rename,
    RPop,
    RPush,
    SAdd,
    SCard,
    SDiff,
    SInter,
    SIsMember,
    SMembers,
    SPop,
    SRem,
    SUnion,
    Set,
    SetEx,
    SetNx,
    StrLen,
    Ttl,
    Type,
    ZAdd,
    ZCard,
    ZIncrBy,
    ZRange,
    ZRank,
    ZRem,
    ZScore,
}

impl StoreCommand {
    pub const ALL: &'static [StoreCommand] = &[
        StoreCommand::Append,
        StoreCommand::DbSize,
        StoreCommand::Decr,
        StoreCommand::DecrBy,
        StoreCommand::Del,
        StoreCommand::Echo,
        StoreCommand::Exists,
        StoreCommand::Expire,
        StoreCommand::FlushDb,
        StoreCommand::Get,
        StoreCommand::GetRange,
        StoreCommand::GetSet,
        StoreCommand::HDel,
        StoreCommand::HExists,
        StoreCommand::HGet,
        StoreCommand::HGetAll,
        StoreCommand::HIncrBy,
        StoreCommand::HKeys,
        StoreCommand::HLen,
        StoreCommand::HMGet,
        StoreCommand::HSet,
        StoreCommand::HVals,
        StoreCommand::Incr,
        StoreCommand::IncrBy,
        StoreCommand::IncrByFloat,
        StoreCommand::Keys,
        StoreCommand::LIndex,
        StoreCommand::LLen,
        StoreCommand::LPop,
        StoreCommand::LPush,
        StoreCommand::LRange,
        StoreCommand::LRem,
        StoreCommand::LSet,
        StoreCommand::LTrim,
        StoreCommand::MGet,
        StoreCommand::MSet,
        StoreCommand::Persist,
        StoreCommand::PExpire,
        StoreCommand::Ping,
        StoreCommand::PTtl,
        StoreCommand::Rename,
        StoreCommand::RPop,
        StoreCommand::RPush,
        StoreCommand::SAdd,
        StoreCommand::SCard,
        StoreCommand::SDiff,
        StoreCommand::SInter,
        StoreCommand::SIsMember,
        StoreCommand::SMembers,
        StoreCommand::SPop,
        StoreCommand::SRem,
        StoreCommand::SUnion,
        StoreCommand::Set,
        StoreCommand::SetEx,
        StoreCommand::SetNx,
        StoreCommand::StrLen,
        StoreCommand::Ttl,
        StoreCommand::Type,
        StoreCommand::ZAdd,
        StoreCommand::ZCard,
        StoreCommand::ZIncrBy,
        StoreCommand::ZRange,
        StoreCommand::ZRank,
        StoreCommand::ZRem,
        StoreCommand::ZScore,
    ];

    /// Wire name sent to the store
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::Append => "APPEND",
            StoreCommand::DbSize => "DBSIZE",
            StoreCommand::Decr => "DECR",
            StoreCommand::DecrBy => "DECRBY",
            StoreCommand::Del => "DEL",
            StoreCommand::Echo => "ECHO",
            StoreCommand::Exists => "EXISTS",
            StoreCommand::Expire => "EXPIRE",
            StoreCommand::FlushDb => "FLUSHDB",
            StoreCommand::Get => "GET",
            StoreCommand::GetRange => "GETRANGE",
            StoreCommand::GetSet => "GETSET",
            StoreCommand::HDel => "HDEL",
            StoreCommand::HExists => "HEXISTS",
            StoreCommand::HGet => "HGET",
            StoreCommand::HGetAll => "HGETALL",
            StoreCommand::HIncrBy => "HINCRBY",
            StoreCommand::HKeys => "HKEYS",
            StoreCommand::HLen => "HLEN",
            StoreCommand::HMGet => "HMGET",
            StoreCommand::HSet => "HSET",
            StoreCommand::HVals => "HVALS",
            StoreCommand::Incr => "INCR",
            StoreCommand::IncrBy => "INCRBY",
            StoreCommand::IncrByFloat => "INCRBYFLOAT",
            StoreCommand::Keys => "KEYS",
            StoreCommand::LIndex => "LINDEX",
            StoreCommand::LLen => "LLEN",
            StoreCommand::LPop => "LPOP",
            StoreCommand::LPush => "LPUSH",
            StoreCommand::LRange => "LRANGE",
            StoreCommand::LRem => "LREM",
            StoreCommand::LSet => "LSET",
            StoreCommand::LTrim => "LTRIM",
            StoreCommand::MGet => "MGET",
            StoreCommand::MSet => "MSET",
            StoreCommand::Persist => "PERSIST",
            StoreCommand::PExpire => "PEXPIRE",
            StoreCommand::Ping => "PING",
            StoreCommand::PTtl => "PTTL",
            StoreCommand::Rename => "RENAME",
            StoreCommand::RPop => "RPOP",
            StoreCommand::RPush => "RPUSH",
            StoreCommand::SAdd => "SADD",
            StoreCommand::SCard => "SCARD",
            StoreCommand::SDiff => "SDIFF",
            StoreCommand::SInter => "SINTER",
            StoreCommand::SIsMember => "SISMEMBER",
            StoreCommand::SMembers => "SMEMBERS",
            StoreCommand::SPop => "SPOP",
            StoreCommand::SRem => "SREM",
            StoreCommand::SUnion => "SUNION",
            StoreCommand::Set => "SET",
            StoreCommand::SetEx => "SETEX",
            StoreCommand::SetNx => "SETNX",
            StoreCommand::StrLen => "STRLEN",
            StoreCommand::Ttl => "TTL",
            StoreCommand::Type => "TYPE",
            StoreCommand::ZAdd => "ZADD",
            StoreCommand::ZCard => "ZCARD",
            StoreCommand::ZIncrBy => "ZINCRBY",
            StoreCommand::ZRange => "ZRANGE",
            StoreCommand::ZRank => "ZRANK",
            StoreCommand::ZRem => "ZREM",
            StoreCommand::ZScore => "ZSCORE",
        }
    }

    pub fn reply_kind(&self) -> ReplyKind {
        match self {
            StoreCommand::HGetAll => ReplyKind::Pairs,
            _ => ReplyKind::Plain,
        }
    }

    /// Decode a raw reply into its typed form
    pub fn decode(&self, value: Value) -> CommandReply {
        match (self.reply_kind(), value) {
            (ReplyKind::Pairs, Value::Bulk(items)) => CommandReply::from_pairs(items),
            (_, value) => CommandReply::from(value),
        }
    }
}

impl fmt::Display for StoreCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StoreCommand {
    type Err = SandboxError;

    /// Case-insensitive lookup against the supported set
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        StoreCommand::ALL
            .iter()
            .copied()
            .find(|command| command.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SandboxError::InvalidCommand(s.to_string()))
    }
}

/// Commands the exec bridge refuses: they never complete on their own or
/// administer the server process itself
const BRIDGE_BLOCKED: &[&str] = &[
    "DEBUG",
    "MONITOR",
    "PSUBSCRIBE",
    "PSYNC",
    "SHUTDOWN",
    "SSUBSCRIBE",
    "SUBSCRIBE",
    "SYNC",
];

static COMMAND_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.|-]{0,63}$").expect("valid command name regex"));

/// Validate a command name for the exec bridge and return it uppercased.
///
/// The bridge accepts commands the direct set does not model, so validation
/// is by shape plus a block list rather than an allow list. A leading letter
/// keeps the name from being read as a `redis-cli` option.
pub fn bridge_command_name(name: &str) -> Result<String, SandboxError> {
    let trimmed = name.trim();
    if !COMMAND_NAME.is_match(trimmed) {
        return Err(SandboxError::InvalidCommand(name.to_string()));
    }

    let upper = trimmed.to_ascii_uppercase();
    if BRIDGE_BLOCKED.contains(&upper.as_str()) {
        return Err(SandboxError::InvalidCommand(name.to_string()));
    }

    Ok(upper)
}

/// A decoded store reply
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandReply {
    Nil,
    Integer(i64),
    Text(String),
    List(Vec<CommandReply>),
    Map(BTreeMap<String, CommandReply>),
}

impl CommandReply {
    fn from_pairs(items: Vec<Value>) -> Self {
        let mut map = BTreeMap::new();
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            let key = match CommandReply::from(field) {
                CommandReply::Text(text) => text,
                CommandReply::Integer(n) => n.to_string(),
                other => format!("{:?}", other),
            };
            map.insert(key, CommandReply::from(value));
        }
        CommandReply::Map(map)
    }

    /// Text form, for replies that are a single string
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CommandReply::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<Value> for CommandReply {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => CommandReply::Nil,
            Value::Int(n) => CommandReply::Integer(n),
            Value::Data(bytes) => CommandReply::Text(String::from_utf8_lossy(&bytes).into_owned()),
            Value::Bulk(items) => {
                CommandReply::List(items.into_iter().map(CommandReply::from).collect())
            }
            Value::Status(status) => CommandReply::Text(status),
            Value::Okay => CommandReply::Text("OK".to_string()),
        }
    }
}
