pub mod progress;
pub mod rpc;

pub use progress::{parse_rate, ProgressEvent};
pub use rpc::{Method, Request, Response, RpcError, RpcErrorKind};

/// Process exit codes shared by the CLI and the proxy router.
pub mod exit_codes {
    /// All operations succeeded.
    pub const SUCCESS: i32 = 0;
    /// Hard failure, or forced exit after a second Ctrl-C.
    pub const FAILURE: i32 = 1;
    /// Partial success: some proxy children succeeded, some failed.
    pub const PARTIAL: i32 = 2;
    /// Command is not supported in proxy mode.
    pub const UNSUPPORTED_PROXY_COMMAND: i32 = 3;
}

/// Commands a proxy project fans out to its children.
pub const PROXY_SUPPORTED_COMMANDS: &[&str] = &[
    "query",
    "status",
    "start",
    "stop",
    "uninstall",
    "fix-config",
    "watch",
];
