//! # Commands
//!
//! Purpose: Immutable description of one request: a name, positional
//! binary arguments and the subset of arguments that are keys.
//!
//! ## Design Principles
//! 1. **Builder Then Freeze**: Commands are assembled with chained calls and
//!    never mutated once handed to a connection (they are shared via `Arc`).
//! 2. **Keys Are Arguments**: A key is an ordinary argument whose position
//!    is also recorded, so routing never re-parses the argument list.
//! 3. **Replay Safety Is Explicit**: Each command knows whether resending it
//!    after a lost reply is harmless.

use bytes::Bytes;

/// Upper bound on arguments in a single request.
pub const MAX_ARGUMENTS: usize = 1024 * 1024;

/// Commands that only read state or set connection-local state.
///
/// Replaying them after a reconnect cannot double-apply a side effect.
const IDEMPOTENT_COMMANDS: &[&[u8]] = &[
    b"AUTH", b"BITCOUNT", b"BITPOS", b"CLIENT", b"DBSIZE", b"ECHO", b"EXISTS", b"GEODIST",
    b"GEOPOS", b"GET", b"GETBIT", b"GETRANGE", b"HELLO", b"HEXISTS", b"HGET", b"HGETALL",
    b"HKEYS", b"HLEN", b"HMGET", b"HSTRLEN", b"HVALS", b"INFO", b"KEYS", b"LINDEX", b"LLEN",
    b"LPOS", b"LRANGE", b"MGET", b"PFCOUNT", b"PING", b"PTTL", b"SCAN", b"SCARD", b"SELECT",
    b"SISMEMBER", b"SMEMBERS", b"SMISMEMBER", b"SRANDMEMBER", b"STRLEN", b"SUNION", b"TIME",
    b"TTL", b"TYPE", b"XLEN", b"XRANGE", b"XREVRANGE", b"ZCARD", b"ZCOUNT", b"ZRANGE",
    b"ZRANGEBYSCORE", b"ZRANK", b"ZREVRANGE", b"ZREVRANK", b"ZSCORE",
];

/// SUBSCRIBE-family commands; over RESP3 their replies arrive as push frames.
const SUBSCRIPTION_COMMANDS: &[&[u8]] = &[
    b"SUBSCRIBE",
    b"PSUBSCRIBE",
    b"SSUBSCRIBE",
    b"UNSUBSCRIBE",
    b"PUNSUBSCRIBE",
    b"SUNSUBSCRIBE",
];

/// One request to the server.
///
/// ```
/// use pkv_common::Command;
///
/// let cmd = Command::new("SET").key("user:1").arg("alice");
/// assert_eq!(cmd.routing_key().map(|k| k.as_ref()), Some(&b"user:1"[..]));
/// assert!(!cmd.is_idempotent());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: Bytes,
    args: Vec<Bytes>,
    key_positions: Vec<usize>,
    idempotent: bool,
}

impl Command {
    /// Starts a command; idempotence defaults from the built-in table.
    pub fn new(name: impl Into<Bytes>) -> Self {
        let name = name.into();
        let idempotent = IDEMPOTENT_COMMANDS
            .iter()
            .any(|known| name.eq_ignore_ascii_case(known));
        Command {
            name,
            args: Vec::new(),
            key_positions: Vec::new(),
            idempotent,
        }
    }

    /// Appends a plain argument.
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a key argument.
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key_positions.push(self.args.len());
        self.args.push(key.into());
        self
    }

    /// Overrides the replay classification.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Command name as given.
    pub fn name(&self) -> &Bytes {
        &self.name
    }

    /// Arguments following the name.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Key arguments in order.
    pub fn keys(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.key_positions.iter().map(move |&idx| &self.args[idx])
    }

    /// First key, used for slot routing.
    pub fn routing_key(&self) -> Option<&Bytes> {
        self.key_positions.first().map(|&idx| &self.args[idx])
    }

    /// True when resending after a lost reply is harmless.
    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &[u8]) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// True for SUBSCRIBE, PSUBSCRIBE, UNSUBSCRIBE and friends.
    pub fn is_subscription(&self) -> bool {
        SUBSCRIPTION_COMMANDS.iter().any(|known| self.is(known))
    }

    /// Name plus arguments as they go on the wire.
    pub fn wire_len(&self) -> usize {
        self.args.len() + 1
    }

    /// Lossy UTF-8 name, for logs.
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_recorded_in_order() {
        let cmd = Command::new("MSET")
            .key("a")
            .arg("1")
            .key("b")
            .arg("2");
        let keys: Vec<&[u8]> = cmd.keys().map(|k| k.as_ref()).collect();
        assert_eq!(keys, vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(cmd.args().len(), 4);
        assert_eq!(cmd.wire_len(), 5);
    }

    #[test]
    fn idempotence_defaults_from_table() {
        assert!(Command::new("get").key("k").is_idempotent());
        assert!(Command::new("PING").is_idempotent());
        assert!(!Command::new("INCR").key("k").is_idempotent());
        assert!(Command::new("INCR").idempotent(true).is_idempotent());
        assert!(!Command::new("GET").idempotent(false).is_idempotent());
    }

    #[test]
    fn no_keys_means_no_routing_key() {
        assert!(Command::new("PING").routing_key().is_none());
    }

    #[test]
    fn subscription_commands_are_flagged() {
        assert!(Command::new("subscribe").arg("news").is_subscription());
        assert!(!Command::new("PUBLISH").arg("news").is_subscription());
    }
}
