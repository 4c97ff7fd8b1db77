//! A virtual inode/block filesystem over a single byte-addressable
//! container: a superblock, inode and block bitmaps, an inode table, and a
//! directory tree of regular files, all parked on top of a plain in-memory
//! buffer, a plain file, or a ChaCha20-encrypted file.
//!
//! The entry point is [`Disk`]: pick a `create_*`/`open_*` constructor for
//! the backing store you want, then reach [`Directory`] and [`FileHandle`]
//! through [`Disk::root`].

pub mod bitmap;
pub mod cipher;
pub mod config;
pub mod container;
pub mod directory;
pub mod disk;
pub mod error;
pub mod inode;
pub mod inode_io;
pub mod util;

pub use config::Config;
pub use container::{ByteContainer, EncryptedFileContainer, FileContainer, MemoryContainer};
pub use directory::{ChildInode, Directory, FileBuffer, FileHandle, FileMode, TreeEntry};
pub use disk::Disk;
pub use error::{DiskError, DiskResult};
pub use inode::{Inode, InodeMode};
