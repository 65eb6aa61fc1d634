//! Catalogue of traced NFS operations
//!
//! Every operation kind owns one counter bundle in a summary record.
//! The discriminant doubles as the bundle index.

use crate::constants::MAX_ERRNO;

/// Kind of filesystem operation folded into a summary record
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    // regular file operations
    Open = 0,
    Close,
    Setattr,
    Getattr,
    Flush,
    Mmap,
    Fsync,
    Lock,

    // I/O operations
    Read,
    Write,

    // directory operations
    Create,
    Link,
    Unlink,
    Symlink,
    Readdir,
    Lookup,
    Rename,
    Access,
    Listxattr,
}

/// Number of operation kinds
pub const OP_KIND_COUNT: usize = 19;

impl OpKind {
    /// All operation kinds in bundle order
    pub const ALL: [OpKind; OP_KIND_COUNT] = [
        OpKind::Open,
        OpKind::Close,
        OpKind::Setattr,
        OpKind::Getattr,
        OpKind::Flush,
        OpKind::Mmap,
        OpKind::Fsync,
        OpKind::Lock,
        OpKind::Read,
        OpKind::Write,
        OpKind::Create,
        OpKind::Link,
        OpKind::Unlink,
        OpKind::Symlink,
        OpKind::Readdir,
        OpKind::Lookup,
        OpKind::Rename,
        OpKind::Access,
        OpKind::Listxattr,
    ];

    /// Index of this kind's counter bundle
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lowercase report name
    pub const fn name(self) -> &'static str {
        match self {
            OpKind::Open => "open",
            OpKind::Close => "close",
            OpKind::Setattr => "setattr",
            OpKind::Getattr => "getattr",
            OpKind::Flush => "flush",
            OpKind::Mmap => "mmap",
            OpKind::Fsync => "fsync",
            OpKind::Lock => "lock",
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::Create => "create",
            OpKind::Link => "link",
            OpKind::Unlink => "unlink",
            OpKind::Symlink => "symlink",
            OpKind::Readdir => "readdir",
            OpKind::Lookup => "lookup",
            OpKind::Rename => "rename",
            OpKind::Access => "access",
            OpKind::Listxattr => "listxattr",
        }
    }

    /// Success convention of the traced call's return value
    ///
    /// `open` reports any non-zero return as a failure. Every other kind
    /// fails only on a `-errno` return: `lookup` returns a dentry pointer
    /// and read/write return byte counts on success.
    pub const fn error_convention(self) -> ErrorConvention {
        match self {
            OpKind::Open => ErrorConvention::NonZero,
            _ => ErrorConvention::NegativeErrno,
        }
    }

    /// Whether a return code means the operation failed
    #[inline]
    pub const fn is_error(self, rc: i64) -> bool {
        self.error_convention().is_error(rc)
    }
}

/// How a traced call signals failure through its return code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorConvention {
    /// Any non-zero return is a failure
    NonZero,
    /// Only `-errno` returns are failures
    ///
    /// Kernel pointers are negative when read as signed integers, so the
    /// range is bounded by `MAX_ERRNO` the way `IS_ERR_VALUE` bounds it.
    NegativeErrno,
}

impl ErrorConvention {
    /// Apply the convention to a raw return code
    #[inline]
    pub const fn is_error(self, rc: i64) -> bool {
        match self {
            ErrorConvention::NonZero => rc != 0,
            ErrorConvention::NegativeErrno => rc < 0 && rc >= -MAX_ERRNO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_order_matches_discriminants() {
        for (i, op) in OpKind::ALL.iter().enumerate() {
            assert_eq!(op.index(), i);
        }
    }

    #[test]
    fn test_open_fails_on_any_non_zero_return() {
        assert!(!OpKind::Open.is_error(0));
        assert!(OpKind::Open.is_error(-2));
        assert!(OpKind::Open.is_error(1));
    }

    #[test]
    fn test_other_kinds_fail_only_on_negative_return() {
        // lookup hands back a pointer, read hands back a byte count
        assert!(!OpKind::Lookup.is_error(0xffff_8880_0000_1000_u64 as i64));
        assert!(!OpKind::Lookup.is_error(0));
        assert!(OpKind::Lookup.is_error(-2));
        assert!(!OpKind::Read.is_error(4096));
        assert!(OpKind::Read.is_error(-5));
        assert!(!OpKind::Unlink.is_error(0));
        assert!(OpKind::Unlink.is_error(-13));
    }
}
