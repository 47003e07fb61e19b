//! Side-effecting layer: filesystem, git, child processes, event streams.

pub mod archive;
pub mod config;
pub mod events;
pub mod git;
pub mod lock;
pub mod patch;
pub mod process;
pub mod workspace;
