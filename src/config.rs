//! Immutable disk geometry.
//!
//! [`Config`] declares four fields — block size, inode size, pool counts —
//! and derives everything else from them once, at construction. Every other
//! module treats a `Config` as a read-only reference: address widths,
//! indirection fan-out, and the maximum file size all flow from here.

use crate::error::{DiskError, DiskResult};
use crate::util::{byte_length, ceil_division};

/// Number of direct block pointers stored in every inode.
pub const NUM_DIRECT_PTRS: u64 = 12;

/// Width in bytes of each of the four superblock geometry fields
/// (`block_size`, `inode_size`, `num_blocks`, `num_inodes`) as stored on
/// disk.
pub const SUPER_BLOCK_DATA_LENGTH: usize = 12;

/// Width in bytes of `mtime`/`ctime` fields as stored on disk.
pub const EPOCH_TIME_BYTES: usize = 6;

/// Maximum length of a directory entry name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Immutable disk geometry, and everything derived from it.
///
/// Two `Config`s with the same four declared fields always derive the same
/// everything else, so equality only needs to compare the declared fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
	/// Size in bytes of one data block.
	pub block_size: u64,
	/// Size in bytes of one inode record.
	pub inode_size: u64,
	/// Total number of data blocks in the image.
	pub num_blocks: u64,
	/// Total number of inode slots in the image.
	pub num_inodes: u64,

	/// Bytes needed to store a block address: `ceil(bitlen(num_blocks)/8)`.
	pub block_addr_length: u64,
	/// Bytes needed to store an inode address: `ceil(bitlen(num_inodes)/8)`.
	pub inode_addr_length: u64,
	/// Number of block addresses that fit in one indirection block.
	pub addrs_per_block: u64,
	/// `addrs_per_block^2`: range covered by a double-indirect block.
	pub double_range: u64,
	/// `addrs_per_block^3`: range covered by a triple-indirect block.
	pub triple_range: u64,
	/// Largest representable file size, in bytes.
	pub max_file_size: u64,
	/// Bytes needed to store `size`: `ceil(bitlen(max_file_size)/8)`.
	pub file_size_length: u64,
	/// `block_size * num_blocks`.
	pub disk_size: u64,
}

impl Config {
	/// Builds a `Config` from the four declared fields, deriving and
	/// validating everything else.
	///
	/// Fails with [`DiskError::InvalidFormat`] if any declared field is
	/// zero, if an inode record would not fit in `inode_size`, or if the
	/// image would have no room for at least one data block after the
	/// header, bitmaps, and inode table.
	pub fn new(
		block_size: u64,
		inode_size: u64,
		num_blocks: u64,
		num_inodes: u64,
	) -> DiskResult<Self> {
		if block_size == 0 || inode_size == 0 || num_blocks == 0 || num_inodes == 0 {
			return Err(DiskError::InvalidFormat(
				"block_size, inode_size, num_blocks and num_inodes must all be positive".into(),
			));
		}

		let block_addr_length = byte_length(num_blocks);
		let inode_addr_length = byte_length(num_inodes);
		let addrs_per_block = block_size / block_addr_length;
		if addrs_per_block == 0 {
			return Err(DiskError::InvalidFormat(format!(
				"block_size={block_size} too small to hold a single block address \
				 ({block_addr_length} bytes)"
			)));
		}
		let double_range = addrs_per_block * addrs_per_block;
		let triple_range = double_range * addrs_per_block;
		let max_file_size =
			(NUM_DIRECT_PTRS + addrs_per_block + double_range + triple_range) * block_size;
		let file_size_length = byte_length(max_file_size);
		let disk_size = block_size * num_blocks;

		let min_inode_record_len = 1
			+ file_size_length
			+ 2 * EPOCH_TIME_BYTES as u64
			+ NUM_DIRECT_PTRS * block_addr_length
			+ 3 * block_addr_length;
		if inode_size < min_inode_record_len {
			return Err(DiskError::InvalidFormat(format!(
				"inode_size={inode_size} too small, need at least {min_inode_record_len} bytes"
			)));
		}

		let inode_bitmap_bytes = ceil_division(num_inodes, 8);
		let block_bitmap_bytes = ceil_division(num_blocks, 8);
		let header_size = SUPER_BLOCK_DATA_LENGTH as u64 * 4
			+ inode_bitmap_bytes
			+ block_bitmap_bytes
			+ inode_size * num_inodes;
		if disk_size < header_size + block_size {
			return Err(DiskError::InvalidFormat(format!(
				"disk_size={disk_size} too small, need at least {} for header + one data block",
				header_size + block_size
			)));
		}

		Ok(Self {
			block_size,
			inode_size,
			num_blocks,
			num_inodes,
			block_addr_length,
			inode_addr_length,
			addrs_per_block,
			double_range,
			triple_range,
			max_file_size,
			file_size_length,
			disk_size,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derives_match_reference_geometry() {
		let cfg = Config::new(1024, 48, 1024, 1024).unwrap();
		assert_eq!(cfg.block_addr_length, 2); // bitlen(1024) = 11 -> ceil(11/8) = 2
		assert_eq!(cfg.inode_addr_length, 2);
		assert_eq!(cfg.addrs_per_block, 512); // 1024 / 2
		assert_eq!(cfg.double_range, 512 * 512);
		assert_eq!(cfg.triple_range, 512 * 512 * 512);
	}

	#[test]
	fn rejects_zero_fields() {
		assert!(Config::new(0, 48, 1024, 1024).is_err());
		assert!(Config::new(1024, 0, 1024, 1024).is_err());
		assert!(Config::new(1024, 48, 0, 1024).is_err());
		assert!(Config::new(1024, 48, 1024, 0).is_err());
	}

	#[test]
	fn rejects_inode_size_too_small() {
		assert!(Config::new(1024, 4, 1024, 1024).is_err());
	}

	#[test]
	fn rejects_disk_too_small_for_header_and_one_block() {
		// A handful of blocks can't possibly hold num_inodes=1024 inode
		// records of 64 bytes each plus bitmaps plus one data block.
		assert!(Config::new(64, 64, 4, 1024).is_err());
	}
}
