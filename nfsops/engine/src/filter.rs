//! Target filter for handle-based operations

use nfsops_common::{constants::*, TargetMeta};

/// Whether an entry against `target` must be ignored
///
/// Rejects targets without a name and targets that are not a regular
/// file, a directory or a symlink (sockets, pipes, devices).
#[inline]
pub fn should_filter(target: &TargetMeta) -> bool {
    if target.name_len == 0 {
        return true;
    }

    !matches!(target.file_type(), S_IFREG | S_IFDIR | S_IFLNK)
}
