//! Probe handlers for NFS client operations
//!
//! One entry handler and one `_ret` exit handler per traced kernel
//! function. Handlers against open files pass the file's metadata so the
//! filter can reject unnamed or special files. Directory and inode
//! operations pass a bare handle and are never filtered.

use crate::{
    helpers::ProbeContext,
    tracker::{Target, Tracker},
};
use nfsops_common::{OpKind, TargetHandle, TargetMeta};

impl Tracker {
    // ========================================================================
    // Regular file operations
    // ========================================================================

    /// Attached to: nfs_file_open, nfs4_file_open
    pub fn nfs_file_open<C: ProbeContext + ?Sized>(&self, ctx: &C, file: &TargetMeta) {
        self.record_entry(ctx, OpKind::Open, Target::File(file), None);
    }

    /// Any non-zero return is a failed open.
    pub fn nfs_file_open_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Open, rc);
    }

    /// Attached to: nfs_file_release
    pub fn nfs_file_release<C: ProbeContext + ?Sized>(&self, ctx: &C, file: &TargetMeta) {
        self.record_entry(ctx, OpKind::Close, Target::File(file), None);
    }

    pub fn nfs_file_release_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Close, rc);
    }

    /// Attached to: nfs_getattr
    pub fn nfs_getattr<C: ProbeContext + ?Sized>(&self, ctx: &C, inode: TargetHandle) {
        self.record_entry(ctx, OpKind::Getattr, Target::Node(inode), None);
    }

    pub fn nfs_getattr_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Getattr, rc);
    }

    /// Attached to: nfs_setattr
    pub fn nfs_setattr<C: ProbeContext + ?Sized>(&self, ctx: &C, inode: TargetHandle) {
        self.record_entry(ctx, OpKind::Setattr, Target::Node(inode), None);
    }

    pub fn nfs_setattr_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Setattr, rc);
    }

    /// Attached to: nfs_file_flush, nfs4_file_flush
    pub fn nfs_file_flush<C: ProbeContext + ?Sized>(&self, ctx: &C, file: &TargetMeta) {
        self.record_entry(ctx, OpKind::Flush, Target::File(file), None);
    }

    pub fn nfs_file_flush_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Flush, rc);
    }

    /// Attached to: nfs_file_mmap
    pub fn nfs_file_mmap<C: ProbeContext + ?Sized>(&self, ctx: &C, file: &TargetMeta) {
        self.record_entry(ctx, OpKind::Mmap, Target::File(file), None);
    }

    pub fn nfs_file_mmap_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Mmap, rc);
    }

    /// Attached to: nfs_file_fsync
    pub fn nfs_file_fsync<C: ProbeContext + ?Sized>(&self, ctx: &C, file: &TargetMeta) {
        self.record_entry(ctx, OpKind::Fsync, Target::File(file), None);
    }

    pub fn nfs_file_fsync_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Fsync, rc);
    }

    /// Attached to: nfs_lock, nfs_flock
    pub fn nfs_lock<C: ProbeContext + ?Sized>(&self, ctx: &C, file: &TargetMeta) {
        self.record_entry(ctx, OpKind::Lock, Target::File(file), None);
    }

    pub fn nfs_lock_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Lock, rc);
    }

    // ========================================================================
    // I/O operations
    // ========================================================================

    /// Shared body of the read, write and splice-read handlers
    fn file_read_write<C: ProbeContext + ?Sized>(
        &self,
        ctx: &C,
        file: &TargetMeta,
        count: u64,
        is_read: bool,
    ) {
        let op = if is_read { OpKind::Read } else { OpKind::Write };
        self.record_entry(ctx, op, Target::File(file), Some(count));
    }

    fn file_read_write_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64, is_read: bool) {
        let op = if is_read { OpKind::Read } else { OpKind::Write };
        self.record_exit(ctx, op, rc);
    }

    /// Attached to: nfs_file_read
    ///
    /// `count` is the requested size, added to the read byte total.
    pub fn nfs_file_read<C: ProbeContext + ?Sized>(&self, ctx: &C, file: &TargetMeta, count: u64) {
        self.file_read_write(ctx, file, count, true);
    }

    pub fn nfs_file_read_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.file_read_write_ret(ctx, rc, true);
    }

    /// Attached to: nfs_file_write
    pub fn nfs_file_write<C: ProbeContext + ?Sized>(&self, ctx: &C, file: &TargetMeta, count: u64) {
        self.file_read_write(ctx, file, count, false);
    }

    pub fn nfs_file_write_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.file_read_write_ret(ctx, rc, false);
    }

    /// Attached to: nfs_file_splice_read
    ///
    /// Accounted as a read.
    pub fn nfs_file_splice_read<C: ProbeContext + ?Sized>(
        &self,
        ctx: &C,
        file: &TargetMeta,
        count: u64,
    ) {
        self.file_read_write(ctx, file, count, true);
    }

    pub fn nfs_file_splice_read_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.file_read_write_ret(ctx, rc, true);
    }

    // ========================================================================
    // Directory operations
    // ========================================================================

    /// Attached to: nfs_readdir
    pub fn nfs_readdir<C: ProbeContext + ?Sized>(&self, ctx: &C, dir: &TargetMeta) {
        self.record_entry(ctx, OpKind::Readdir, Target::File(dir), None);
    }

    pub fn nfs_readdir_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Readdir, rc);
    }

    /// Attached to: nfs_create
    pub fn nfs_create<C: ProbeContext + ?Sized>(&self, ctx: &C, dir: TargetHandle) {
        self.record_entry(ctx, OpKind::Create, Target::Node(dir), None);
    }

    pub fn nfs_create_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Create, rc);
    }

    /// Attached to: nfs_link
    pub fn nfs_link<C: ProbeContext + ?Sized>(&self, ctx: &C, dir: TargetHandle) {
        self.record_entry(ctx, OpKind::Link, Target::Node(dir), None);
    }

    pub fn nfs_link_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Link, rc);
    }

    /// Attached to: nfs_unlink
    pub fn nfs_unlink<C: ProbeContext + ?Sized>(&self, ctx: &C, dir: TargetHandle) {
        self.record_entry(ctx, OpKind::Unlink, Target::Node(dir), None);
    }

    pub fn nfs_unlink_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Unlink, rc);
    }

    /// Attached to: nfs_symlink
    pub fn nfs_symlink<C: ProbeContext + ?Sized>(&self, ctx: &C, dir: TargetHandle) {
        self.record_entry(ctx, OpKind::Symlink, Target::Node(dir), None);
    }

    pub fn nfs_symlink_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Symlink, rc);
    }

    /// Attached to: nfs_lookup
    pub fn nfs_lookup<C: ProbeContext + ?Sized>(&self, ctx: &C, dir: TargetHandle) {
        self.record_entry(ctx, OpKind::Lookup, Target::Node(dir), None);
    }

    /// A successful lookup returns a dentry pointer, only `-errno` fails.
    pub fn nfs_lookup_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Lookup, rc);
    }

    /// Attached to: nfs_rename
    ///
    /// The operation is attributed to the destination, so the identity
    /// carries the new target's volume.
    pub fn nfs_rename<C: ProbeContext + ?Sized>(
        &self,
        ctx: &C,
        _old: TargetHandle,
        new: TargetHandle,
    ) {
        self.record_entry(ctx, OpKind::Rename, Target::Node(new), None);
    }

    pub fn nfs_rename_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Rename, rc);
    }

    /// Attached to: nfs_do_access
    pub fn nfs_do_access<C: ProbeContext + ?Sized>(&self, ctx: &C, inode: TargetHandle) {
        self.record_entry(ctx, OpKind::Access, Target::Node(inode), None);
    }

    pub fn nfs_do_access_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Access, rc);
    }

    /// Attached to: nfs3_listxattr, nfs4_listxattr
    pub fn nfs_listxattr<C: ProbeContext + ?Sized>(&self, ctx: &C, inode: TargetHandle) {
        self.record_entry(ctx, OpKind::Listxattr, Target::Node(inode), None);
    }

    pub fn nfs_listxattr_ret<C: ProbeContext + ?Sized>(&self, ctx: &C, rc: i64) {
        self.record_exit(ctx, OpKind::Listxattr, rc);
    }

    // ========================================================================
    // Process launch
    // ========================================================================

    /// Attached to: execve (return)
    ///
    /// Queues the calling pid so the reader can read the new image's
    /// environment.
    pub fn execve_ret<C: ProbeContext + ?Sized>(&self, ctx: &C) {
        self.notify_launch(ctx);
    }
}
