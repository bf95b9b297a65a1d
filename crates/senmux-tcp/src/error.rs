use std::io;

use thiserror::Error;

/// Bad or missing option in the `(var, val)` sequence handed to [`crate::init::init_tcp`].
///
/// Fatal for the interface being constructed; reported before any thread is spawned.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown option {0:?}")]
    UnknownOption(String),
    #[error("option {0:?} requires persist mode")]
    RequiresPersist(&'static str),
    #[error("option {option:?} has invalid value {value:?}")]
    InvalidValue { option: &'static str, value: String },
    #[error("client mode requires an address")]
    MissingAddress,
    #[error("preamble and gpsd options are mutually exclusive")]
    PreambleAndGpsd,
    #[error("invalid preamble: {0}")]
    Preamble(#[from] PreambleError),
}

/// Escape parsing failure in a preamble string (§4.A).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreambleError {
    #[error("dangling backslash at end of input")]
    DanglingEscape,
    #[error("incomplete \\xHH escape")]
    IncompleteHexEscape,
    #[error("invalid hex digit in \\xHH escape")]
    InvalidHexDigit,
    #[error("literal NUL byte mid-escape")]
    EmbeddedNul,
    #[error("preamble exceeds MAXPREAMBLE ({0} bytes)")]
    TooLong(usize),
}

/// `getaddrinfo` failure, classified per spec.md §4.B/§7.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// `EAI_AGAIN` / `EAI_FAIL` / `EAI_NONAME` / `EAI_SERVICE`: transient,
    /// caller should sleep and retry (spec.md §4.B, §7).
    #[error("transient resolution failure (gai code {0})")]
    Transient(i32),
    /// Any other `EAI_*` code: not retried, fatal to the caller's current attempt.
    #[error("resolution failed (gai code {0})")]
    Hard(i32),
}

impl ResolveError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::Transient(_))
    }
}

/// Failure establishing one client connection (§4.D).
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("address resolution deferred: no addresses yet")]
    NoAddressesYet,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("could not connect to any resolved address: {0}")]
    AllAddressesFailed(io::Error),
    #[error("preamble write failed: {0}")]
    PreambleWrite(io::Error),
}

/// I/O failure on an established connection (§4.F/§4.G), carried into
/// [`crate::host::InterfaceLifecycle::on_thread_exit`] for post-mortem logging.
#[derive(Error, Debug)]
#[error("tcp io failure: {source}")]
pub struct IoFailure {
    #[source]
    pub source: io::Error,
}

impl From<io::Error> for IoFailure {
    fn from(source: io::Error) -> Self {
        IoFailure { source }
    }
}
