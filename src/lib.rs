//! A capability-based WASI preview-1 host runtime.
//!
//! This crate implements the host side of the `wasi_snapshot_preview1`
//! system-call surface: a WebAssembly guest (say, a coreutils port) names
//! files and directories, and the runtime translates each call into
//! operations on a pluggable, asynchronous storage backend and a set of
//! standard-stream adapters, returning a numeric `errno` through the ABI.
//!
//! The WebAssembly engine itself stays outside the crate.  An embedder:
//!
//! 1. builds a [`Config`] (preopens, streams, argv, environment) and a
//!    [`Bindings`] from it,
//! 2. registers every import named by [`WasiApiName`] under
//!    [`Bindings::WASI_SNAPSHOT_MODULE_NAME`], type-checking against
//!    [`WasiApiName::signature`],
//! 3. implements [`MemoryHandler`] over the instance's linear memory, taking
//!    care to re-derive the view on every call (the guest may grow, and
//!    thereby relocate, its memory), and
//! 4. drives each trapped import through [`Bindings::dispatch`], converting
//!    [`FatalError::Exit`] into the process exit status via [`run_status`].
//!
//! All state lives in the [`Bindings`] value; there is no global state and
//! no locking, because the guest and its handlers run cooperatively.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

pub mod abi;
pub mod fs;
pub mod platform;
pub mod storage;
pub mod stream;
pub mod types;
pub mod wasi;

pub use abi::{AbiType, MemoryHandler, WasmValue};
pub use types::ErrNo;
pub use wasi::{Bindings, FatalError, WasiApiName};

use crate::storage::DirHandle;
use crate::stream::{InputStream, OutputStream};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Notify;

/// Construction-time configuration for one guest run.  Every field is
/// captured once by [`Bindings::new`]; nothing reloads at runtime.
pub struct Config {
    /// Mount point to directory capability, in registration order.  Later
    /// mounts shadow earlier ones at equal prefix length.
    pub preopens: Vec<(String, Arc<dyn DirHandle>)>,
    pub stdin: Box<dyn InputStream>,
    pub stdout: Box<dyn OutputStream>,
    pub stderr: Box<dyn OutputStream>,
    /// Observed by the guest as `argv[0]`.
    pub program_name: String,
    /// The remaining command-line arguments.
    pub arguments: Vec<String>,
    /// `KEY=VALUE` environment entries, in order.
    pub environment: Vec<(String, String)>,
    /// Print an strace-style line for every handled call.
    pub enable_strace: bool,
    /// Aborts long-running handlers with `Canceled` when triggered.
    pub cancel: Option<CancelToken>,
}

/// A host-supplied cancel signal.  Cloning shares the signal; cancelling is
/// sticky and wakes every waiter.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the signal.  Handlers already past their last cancellation
    /// point complete normally; in-flight waits abort with `Canceled`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                break;
            }
            notified.await;
        }
    }
}

/// Folds a completed guest run into its process exit status: a normal return
/// from `_start` is 0, `proc_exit(code)` is `code`, and anything else is a
/// genuine host failure.
pub fn run_status(result: Result<(), FatalError>) -> anyhow::Result<u32> {
    match result {
        Ok(()) => Ok(0),
        Err(FatalError::Exit(code)) => Ok(code),
        Err(fatal) => Err(fatal.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_folds_exit_signals() {
        assert_eq!(run_status(Ok(())).unwrap(), 0);
        assert_eq!(run_status(Err(FatalError::Exit(120))).unwrap(), 120);
        assert!(run_status(Err(FatalError::UnknownHostFunction(String::from(
            "nope"
        ))))
        .is_err());
    }

    #[tokio::test]
    async fn cancel_tokens_wake_pending_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        handle.await.expect("waiter completes");
        assert!(token.is_cancelled());
        // Waiting on an already-cancelled token returns immediately.
        token.cancelled().await;
    }
}
