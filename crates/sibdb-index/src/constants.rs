//! Node-group tree constants.

/// Levels built at construction: root, one intermediate internal group, and
/// one leaf group. The tree never gets shorter than this.
pub const MIN_HEIGHT: usize = 3;
