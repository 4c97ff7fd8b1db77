//! Crate-wide error type.
//!
//! The on-disk format has a small, fixed set of failure modes (spec'd in
//! terms of *kind*, not implementation): missing entries, name collisions,
//! mode mismatches, bounds violations, exhausted pools, malformed headers,
//! authentication failures on the encrypted backend, and I/O failures from
//! the underlying container. `DiskError` covers all of them.

use std::io;

/// Convenience alias used throughout the crate in place of `Result<T, E>`.
pub type DiskResult<T> = Result<T, DiskError>;

/// Everything that can go wrong while operating on a virtual disk.
#[derive(Debug, thiserror::Error)]
pub enum DiskError {
	/// A named entry was not found on a lookup path.
	#[error("not found: {0}")]
	NotFound(String),

	/// A name collision occurred on creation without `overwrite`/`exist_ok`.
	#[error("already exists: {0}")]
	AlreadyExists(String),

	/// The operation expected a regular file but found a directory.
	#[error("is a directory: {0}")]
	IsADirectory(String),

	/// The operation expected a directory but found a regular file.
	#[error("not a directory: {0}")]
	NotADirectory(String),

	/// `rmdir` was called on a directory with entries other than `.`/`..`.
	#[error("directory not empty: {0}")]
	NotEmpty(String),

	/// A negative offset/size, an out-of-bounds bitmap index, or an invalid
	/// seek.
	#[error("out of range: {0}")]
	OutOfRange(String),

	/// The inode or block bitmap has no free slot left.
	#[error("{0} pool exhausted")]
	Full(&'static str),

	/// A directory entry name exceeded 255 bytes.
	#[error("name too long ({0} bytes, max 255)")]
	NameTooLong(usize),

	/// A header or inode buffer had the wrong size, or a value failed to
	/// parse into its expected shape.
	#[error("invalid format: {0}")]
	InvalidFormat(String),

	/// The on-disk image is internally inconsistent (e.g. an expected
	/// reserved bit was not set on open).
	#[error("corrupt image: {0}")]
	Corrupt(String),

	/// HMAC verification of the encrypted header failed: wrong password or
	/// tampered header.
	#[error("authentication failed: wrong password or corrupted header")]
	AuthenticationFailed,

	/// The underlying byte container failed to read or write.
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	/// The operation was attempted on a closed handle.
	#[error("operation on closed handle")]
	Closed,

	/// A write was attempted through a collaborator bound as read-only.
	#[error("read-only")]
	ReadOnly,
}

impl DiskError {
	/// Shorthand for [`DiskError::NotFound`] with a formatted entry name.
	pub fn not_found(name: impl Into<String>) -> Self {
		Self::NotFound(name.into())
	}

	/// Shorthand for [`DiskError::AlreadyExists`] with a formatted entry name.
	pub fn exists(name: impl Into<String>) -> Self {
		Self::AlreadyExists(name.into())
	}
}
