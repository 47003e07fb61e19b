//! Stable exit codes for the patchrun CLI.

/// Run reached SUCCESS or the dry-run stop.
pub const OK: i32 = 0;
/// Run failed at some stage (stage-tagged reason on stderr).
pub const FAILED: i32 = 1;
/// Change committed and pushed, but the post-success audit hook failed.
pub const AUDIT: i32 = 2;
