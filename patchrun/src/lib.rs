//! Patch application and promotion engine.
//!
//! A change arrives as a patch source (diff, generator script, or zip
//! bundle), is applied inside an isolated workspace clone, checked against
//! its declared scope, validated by a gate pipeline, then promoted onto the
//! live branch, committed, pushed and archived. Every run appends a
//! structured event stream and ends in one of the terminal stages SUCCESS,
//! FAIL or AUDIT.
//!
//! Layering: `core/` is pure rule evaluation, `io/` touches the filesystem,
//! git and child processes, and the top-level modules orchestrate.

pub mod audit;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod gates;
pub mod io;
pub mod logging;
pub mod promote;
pub mod publish;
pub mod run;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
