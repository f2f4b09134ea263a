//! Library entrypoint for tnt-git-hook.
//!
//! The primary interface is the `tnt-git-hook` binary, invoked by the
//! pre-push hook. The evidence engine (`commit`, `remote`, `section`,
//! `evidence`) is pure and has no I/O beyond reading a commit log file; the
//! remaining modules wire it to TNT, the keychain and the command line.

pub mod activity;
pub mod api_client;
pub mod commit;
pub mod config;
pub mod evidence;
pub mod hook;
pub mod keychain;
pub mod output;
pub mod remote;
pub mod section;
