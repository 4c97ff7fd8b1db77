//! On-disk inode record: metadata plus the 12 direct and three indirect
//! block pointers.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{Config, EPOCH_TIME_BYTES, NUM_DIRECT_PTRS};
use crate::error::{DiskError, DiskResult};

/// A block pointer value that means "absent". Block index `0` can never be
/// a real data block either, since it's always reserved by the superblock
/// region, so this sentinel never collides with a live pointer.
pub const NULL_PTR: u64 = 0;

/// What kind of object an inode describes.
///
/// Symbolic links are a reserved, unimplemented mode: the discriminant is
/// carved out on disk so a future reader can recognize one without
/// reinterpreting old images, but nothing in this crate ever produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeMode {
	RegularFile,
	Directory,
	SymbolicLink,
}

impl InodeMode {
	fn to_u8(self) -> u8 {
		match self {
			InodeMode::RegularFile => 1,
			InodeMode::Directory => 2,
			InodeMode::SymbolicLink => 3,
		}
	}

	fn from_u8(value: u8) -> DiskResult<Self> {
		match value {
			1 => Ok(InodeMode::RegularFile),
			2 => Ok(InodeMode::Directory),
			3 => Ok(InodeMode::SymbolicLink),
			other => Err(DiskError::InvalidFormat(format!(
				"unrecognized inode mode byte {other}"
			))),
		}
	}
}

pub(crate) fn current_time_epoch() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// In-memory view of one inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
	pub st_mode: InodeMode,
	pub st_size: u64,
	pub st_mtime: u64,
	pub st_ctime: u64,
	pub directs: [u64; NUM_DIRECT_PTRS as usize],
	pub indirect: u64,
	pub double_indirect: u64,
	pub triple_indirect: u64,
}

impl Inode {
	/// Creates a fresh, empty inode of the given kind, timestamped now.
	pub fn new(st_mode: InodeMode) -> Self {
		let now = current_time_epoch();
		Self {
			st_mode,
			st_size: 0,
			st_mtime: now,
			st_ctime: now,
			directs: [NULL_PTR; NUM_DIRECT_PTRS as usize],
			indirect: NULL_PTR,
			double_indirect: NULL_PTR,
			triple_indirect: NULL_PTR,
		}
	}

	/// Decodes a fixed-width, big-endian inode record.
	///
	/// `data` must be exactly `config.inode_size` bytes, as read straight
	/// out of the inode table.
	pub fn from_bytes(data: &[u8], config: &Config) -> DiskResult<Self> {
		if data.len() as u64 != config.inode_size {
			return Err(DiskError::InvalidFormat(format!(
				"inode record is {} bytes, expected {}",
				data.len(),
				config.inode_size
			)));
		}

		let addr_len = config.block_addr_length as usize;
		let size_len = config.file_size_length as usize;
		let mut offset = 0usize;

		let st_mode = InodeMode::from_u8(data[offset])?;
		offset += 1;

		let st_size = read_be(&data[offset..offset + size_len]);
		offset += size_len;

		let st_mtime = read_be(&data[offset..offset + EPOCH_TIME_BYTES]);
		offset += EPOCH_TIME_BYTES;

		let st_ctime = read_be(&data[offset..offset + EPOCH_TIME_BYTES]);
		offset += EPOCH_TIME_BYTES;

		let mut directs = [NULL_PTR; NUM_DIRECT_PTRS as usize];
		for slot in directs.iter_mut() {
			*slot = read_be(&data[offset..offset + addr_len]);
			offset += addr_len;
		}

		let indirect = read_be(&data[offset..offset + addr_len]);
		offset += addr_len;
		let double_indirect = read_be(&data[offset..offset + addr_len]);
		offset += addr_len;
		let triple_indirect = read_be(&data[offset..offset + addr_len]);

		Ok(Self {
			st_mode,
			st_size,
			st_mtime,
			st_ctime,
			directs,
			indirect,
			double_indirect,
			triple_indirect,
		})
	}

	/// Encodes this inode to a fixed-width, big-endian, `config.inode_size`
	/// byte buffer, zero-padded at the tail.
	pub fn to_bytes(&self, config: &Config) -> Vec<u8> {
		let addr_len = config.block_addr_length as usize;
		let size_len = config.file_size_length as usize;

		let mut out = Vec::with_capacity(config.inode_size as usize);
		out.push(self.st_mode.to_u8());
		out.extend(write_be(self.st_size, size_len));
		out.extend(write_be(self.st_mtime, EPOCH_TIME_BYTES));
		out.extend(write_be(self.st_ctime, EPOCH_TIME_BYTES));
		for &direct in &self.directs {
			out.extend(write_be(direct, addr_len));
		}
		out.extend(write_be(self.indirect, addr_len));
		out.extend(write_be(self.double_indirect, addr_len));
		out.extend(write_be(self.triple_indirect, addr_len));

		out.resize(config.inode_size as usize, 0);
		out
	}
}

pub(crate) fn read_be(bytes: &[u8]) -> u64 {
	let mut value = 0u64;
	for &b in bytes {
		value = (value << 8) | b as u64;
	}
	value
}

pub(crate) fn write_be(value: u64, len: usize) -> Vec<u8> {
	let mut out = vec![0u8; len];
	let mut v = value;
	for i in (0..len).rev() {
		out[i] = (v & 0xFF) as u8;
		v >>= 8;
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_config() -> Config {
		Config::new(1024, 64, 1024, 1024).unwrap()
	}

	#[test]
	fn round_trips_through_bytes() {
		let config = test_config();
		let mut inode = Inode::new(InodeMode::RegularFile);
		inode.st_size = 12345;
		inode.directs[0] = 7;
		inode.directs[1] = 8;
		inode.indirect = 42;

		let bytes = inode.to_bytes(&config);
		assert_eq!(bytes.len() as u64, config.inode_size);

		let decoded = Inode::from_bytes(&bytes, &config).unwrap();
		assert_eq!(decoded, inode);
	}

	#[test]
	fn rejects_wrong_length_on_decode() {
		let config = test_config();
		let bytes = vec![0u8; config.inode_size as usize - 1];
		assert!(Inode::from_bytes(&bytes, &config).is_err());
	}

	#[test]
	fn rejects_unknown_mode_byte() {
		let config = test_config();
		let mut bytes = Inode::new(InodeMode::Directory).to_bytes(&config);
		bytes[0] = 0xFF;
		assert!(Inode::from_bytes(&bytes, &config).is_err());
	}

	#[test]
	fn fresh_inode_has_all_null_pointers() {
		let inode = Inode::new(InodeMode::Directory);
		assert!(inode.directs.iter().all(|&p| p == NULL_PTR));
		assert_eq!(inode.indirect, NULL_PTR);
		assert_eq!(inode.double_indirect, NULL_PTR);
		assert_eq!(inode.triple_indirect, NULL_PTR);
	}
}
