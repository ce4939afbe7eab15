//! Command Classification
//!
//! The proxy has to decide, before forwarding anything, whether a client
//! request may travel through a multiplexed backend connection at all. The
//! decision is a pure lookup of the lowercased command name against three
//! fixed sets:
//!
//! - **Unsafe**: administrative, introspection, replication and persistence
//!   commands that must never be proxied transparently.
//! - **Single backend only**: transactions and multi-key operations that only
//!   make sense while every request of a session lands on the same backend.
//! - **Publish/subscribe**: commands that turn the connection into a
//!   subscription stream. Only `subscribe` is supported.
//!
//! The sets are sorted constant slices, so membership is a binary search and
//! there is no global state to initialise or mutate.

/// Commands declared once for convenience
pub const DEL_COMMAND: &[u8] = b"del";
pub const SUBSCRIBE_COMMAND: &[u8] = b"subscribe";
pub const UNSUBSCRIBE_COMMAND: &[u8] = b"unsubscribe";
pub const PING_COMMAND: &[u8] = b"ping";
pub const INFO_COMMAND: &[u8] = b"info";
pub const SELECT_COMMAND: &[u8] = b"select";
pub const QUIT_COMMAND: &[u8] = b"quit";

/// Commands that must not be executed through the proxy.
///
/// Operators who know what they are doing can run these directly against
/// the backend.
pub const UNSAFE_COMMANDS: &[&[u8]] = &[
    b"auth",
    b"bgrewriteaof",
    b"bgsave",
    b"client",
    b"config",
    b"dbsize",
    b"debug",
    b"flushall",
    b"flushdb",
    b"lastsave",
    b"migrate",
    b"monitor",
    b"move",
    b"object",
    b"psubscribe",
    b"pubsub",
    b"punsubscribe",
    b"randomkey",
    b"save",
    b"shutdown",
    b"slaveof",
    b"slowlog",
    b"sync",
    b"time",
    // TODO: route unsubscribe through the subscription handler instead
    UNSUBSCRIBE_COMMAND,
];

/// Commands that only work while multiplexing is disabled.
///
/// Watching on one backend, running `multi` on another and incrementing on a
/// third is worthless.
pub const SINGLE_BACKEND_COMMANDS: &[&[u8]] = &[
    b"bitop",
    b"brpoplpush",
    b"discard",
    b"eval",
    b"exec",
    b"keys",
    b"mget",
    b"mset",
    b"msetnx",
    b"multi",
    b"rename",
    b"renamenx",
    b"rpoplpush",
    b"script",
    b"sdiff",
    b"sdiffstore",
    b"sinter",
    b"sinterstore",
    b"smove",
    b"sunion",
    b"sunionstore",
    b"unwatch",
    b"watch",
    b"zinterstore",
    b"zunionstore",
];

/// Publish/subscribe commands the proxy knows how to serve.
pub const PUBSUB_COMMANDS: &[&[u8]] = &[SUBSCRIBE_COMMAND];

/// Commands the proxy answers or intercepts itself instead of forwarding
/// them verbatim: `select` changes the session's database, `quit` ends it.
pub const INTERCEPTED_COMMANDS: &[&[u8]] = &[INFO_COMMAND, PING_COMMAND, QUIT_COMMAND, SELECT_COMMAND];

/// Routing class of a scanned command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Must never be proxied
    Unsafe,
    /// Valid only when every request of the session goes to one backend
    SingleBackendOnly,
    /// Turns the client connection into a subscription
    PubSub,
    /// Everything else
    Proxyable,
}

impl CommandClass {
    /// Classifies an already-lowercased command name.
    ///
    /// Command identity is case-insensitive, but the lookup is not: pass the
    /// name returned by [`get_command`](crate::protocol::get_command), which
    /// lowercases it.
    pub fn of(command: &[u8]) -> Self {
        if is_unsafe(command) {
            CommandClass::Unsafe
        } else if is_single_backend_only(command) {
            CommandClass::SingleBackendOnly
        } else if is_pubsub(command) {
            CommandClass::PubSub
        } else {
            CommandClass::Proxyable
        }
    }
}

#[inline]
fn contains<'a>(set: &[&'a [u8]], command: &'a [u8]) -> bool {
    set.binary_search(&command).is_ok()
}

pub fn is_unsafe(command: &[u8]) -> bool {
    contains(UNSAFE_COMMANDS, command)
}

pub fn is_single_backend_only(command: &[u8]) -> bool {
    contains(SINGLE_BACKEND_COMMANDS, command)
}

pub fn is_pubsub(command: &[u8]) -> bool {
    contains(PUBSUB_COMMANDS, command)
}

/// True for commands the proxy handles before any backend is involved.
///
/// Independent of [`CommandClass`]: all of these classify as proxyable.
pub fn is_intercepted(command: &[u8]) -> bool {
    contains(INTERCEPTED_COMMANDS, command)
}
