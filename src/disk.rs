//! Top-level assembly: superblock, bitmaps, and inode table over one
//! [`ByteContainer`], plus space accounting.

use std::path::Path;

use log::debug;

use crate::bitmap::Bitmap;
use crate::config::{Config, SUPER_BLOCK_DATA_LENGTH};
use crate::container::{ByteContainer, EncryptedFileContainer, FileContainer, MemoryContainer};
use crate::directory::Directory;
use crate::error::{DiskError, DiskResult};
use crate::inode::{read_be, write_be, Inode, InodeMode};
use crate::inode_io::{BlockAccess, InodeIO};
use crate::util::ceil_division;

/// Disk-type tag for a plain, unencrypted image.
const DISK_TYPE_PLAIN: u8 = 0x00;

/// Geometry, free-space bookkeeping, and the inode table, layered on one
/// [`ByteContainer`].
///
/// `C` is fixed for the lifetime of a `Disk` — a caller picks
/// [`MemoryContainer`], [`FileContainer`], or [`EncryptedFileContainer`] up
/// front via the matching `create_*`/`open_*` constructor, and every
/// subsequent operation is generic over `ByteContainer` from there on.
///
/// Every inode index this type and [`Directory`]/[`crate::directory::FileHandle`]
/// hand back is a plain `u64`. A caller building something like a per-inode
/// writer lock (the kind a WebDAV binding needs to serialize concurrent
/// opens of the same file) can key its own map on that index directly —
/// this crate does not serialize concurrent access itself.
pub struct Disk<C: ByteContainer> {
	container: C,
	config: Config,
	inode_bitmap: Bitmap,
	block_bitmap: Bitmap,
	inode_bitmap_offset: u64,
	block_bitmap_offset: u64,
	inode_table_offset: u64,
	reserved_space: u64,
}

impl<C: ByteContainer> Disk<C> {
	/// Geometry this disk was created/opened with.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Total addressable size of the image, in bytes.
	pub fn total_space(&self) -> u64 {
		self.config.disk_size
	}

	/// Bytes still available for allocation.
	pub fn free_space(&self) -> u64 {
		self.config.block_size * self.block_bitmap.free_count()
	}

	/// Bytes currently allocated to data (`total_space - free_space`).
	pub fn used_space(&self) -> u64 {
		self.total_space() - self.free_space()
	}

	/// Bytes permanently occupied by the superblock, bitmaps, and inode
	/// table, regardless of how full the disk is.
	pub fn reserved_space(&self) -> u64 {
		self.reserved_space
	}

	/// Releases the underlying container. Idempotent.
	pub fn close(&mut self) -> DiskResult<()> {
		self.container.close()
	}

	/// The root directory, inode 0.
	pub fn root(&mut self) -> DiskResult<Directory> {
		let inode = self.read_inode(0)?;
		Directory::from_parts(0, inode)
	}

	/// Decodes the inode record at slot `ptr`.
	pub fn read_inode(&mut self, ptr: u64) -> DiskResult<Inode> {
		if ptr >= self.config.num_inodes {
			return Err(DiskError::OutOfRange(format!(
				"inode {ptr} out of range (num_inodes={})",
				self.config.num_inodes
			)));
		}
		let offset = self.inode_table_offset + ptr * self.config.inode_size;
		let data = self.container.read(offset, self.config.inode_size as usize)?;
		Inode::from_bytes(&data, &self.config)
	}

	/// Encodes and persists `inode` to slot `ptr`.
	pub fn write_inode(&mut self, ptr: u64, inode: &Inode) -> DiskResult<()> {
		if ptr >= self.config.num_inodes {
			return Err(DiskError::OutOfRange(format!(
				"inode {ptr} out of range (num_inodes={})",
				self.config.num_inodes
			)));
		}
		let offset = self.inode_table_offset + ptr * self.config.inode_size;
		self.container.write(offset, &inode.to_bytes(&self.config))?;
		Ok(())
	}

	/// Finds a free inode slot and marks it used.
	pub fn alloc_inode(&mut self) -> DiskResult<u64> {
		let ptr = if self.container.mirrors_metadata() {
			self.inode_bitmap
				.find_and_flip_free_in(&mut self.container, self.inode_bitmap_offset)?
		} else {
			self.inode_bitmap.find_and_flip_free()?
		};
		debug!("allocated inode {ptr}");
		Ok(ptr)
	}

	/// Marks an inode slot free.
	pub fn free_inode(&mut self, ptr: u64) -> DiskResult<()> {
		if self.container.mirrors_metadata() {
			self.inode_bitmap
				.clear_in(&mut self.container, self.inode_bitmap_offset, ptr)?;
		} else {
			self.inode_bitmap.clear(ptr)?;
		}
		debug!("freed inode {ptr}");
		Ok(())
	}

	/// Builds a logical-offset view over `inode`'s data blocks, borrowing
	/// this disk's container and block bitmap for the duration.
	pub fn inode_io<'d>(&'d mut self, inode: &'d mut Inode) -> InodeIO<'d, 'd> {
		let blocks = BlockAccess::new(
			&mut self.container,
			&mut self.block_bitmap,
			0,
			self.block_bitmap_offset,
			self.config.block_size,
		);
		InodeIO::new(inode, &self.config, blocks)
	}

	fn create_on(mut container: C, config: Config, disk_type_byte: Option<u8>) -> DiskResult<Self> {
		if !container.mirrors_metadata() {
			// Heap-resident container: no superblock, no on-disk bitmaps —
			// `inode_bitmap`/`block_bitmap` stay plain in-memory `Bitmap`s
			// and the container never needs to be reloaded from bytes, so
			// there's nothing to reserve in the block pool for a header.
			// Block 0 is still marked used, since pointer value 0 doubles
			// as `NULL_PTR` and must never be handed out as a real address.
			let inode_bitmap = Bitmap::new(config.num_inodes);
			let mut block_bitmap = Bitmap::new(config.num_blocks);
			block_bitmap.set(0)?;

			let inode_table_offset = config.block_size * config.num_blocks;
			let reserved_space = config.block_size;

			let mut disk = Self {
				container,
				config,
				inode_bitmap,
				block_bitmap,
				inode_bitmap_offset: 0,
				block_bitmap_offset: 0,
				inode_table_offset,
				reserved_space,
			};

			disk.inode_bitmap.set(0)?;
			disk.write_inode(0, &Inode::new(InodeMode::Directory))?;

			debug!(
				"created disk: {} blocks x {} bytes, {} inodes x {} bytes, {} reserved bytes \
				 (heap-resident metadata, no header in the block pool)",
				disk.config.num_blocks, disk.config.block_size, disk.config.num_inodes, disk.config.inode_size, reserved_space
			);
			return Ok(disk);
		}

		let mut offset = 0u64;
		if let Some(tag) = disk_type_byte {
			container.write(offset, &[tag])?;
			offset += 1;
		}

		let mut header = Vec::with_capacity(SUPER_BLOCK_DATA_LENGTH * 4);
		header.extend(write_be(config.block_size, SUPER_BLOCK_DATA_LENGTH));
		header.extend(write_be(config.inode_size, SUPER_BLOCK_DATA_LENGTH));
		header.extend(write_be(config.num_blocks, SUPER_BLOCK_DATA_LENGTH));
		header.extend(write_be(config.num_inodes, SUPER_BLOCK_DATA_LENGTH));
		container.write(offset, &header)?;
		offset += header.len() as u64;

		let inode_bitmap_offset = offset;
		let inode_bitmap = Bitmap::create_in(&mut container, inode_bitmap_offset, config.num_inodes)?;
		offset += ceil_division(config.num_inodes, 8);

		let block_bitmap_offset = offset;
		let mut block_bitmap = Bitmap::create_in(&mut container, block_bitmap_offset, config.num_blocks)?;
		offset += ceil_division(config.num_blocks, 8);

		let inode_table_offset = offset;
		offset += config.inode_size * config.num_inodes;
		let reserved_space = offset;

		if config.disk_size < reserved_space + config.block_size {
			return Err(DiskError::InvalidFormat(format!(
				"disk_size={} too small, need at least {} for header + one data block",
				config.disk_size,
				reserved_space + config.block_size
			)));
		}

		let num_super_blocks = ceil_division(reserved_space, config.block_size);
		for i in 0..num_super_blocks {
			block_bitmap.set(i)?;
			block_bitmap.flush_byte(&mut container, block_bitmap_offset, i)?;
		}

		let mut disk = Self {
			container,
			config,
			inode_bitmap,
			block_bitmap,
			inode_bitmap_offset,
			block_bitmap_offset,
			inode_table_offset,
			reserved_space,
		};

		disk.inode_bitmap.set(0)?;
		disk.inode_bitmap
			.flush_byte(&mut disk.container, inode_bitmap_offset, 0)?;
		disk.write_inode(0, &Inode::new(InodeMode::Directory))?;

		debug!(
			"created disk: {} blocks x {} bytes, {} inodes x {} bytes, {} reserved bytes",
			disk.config.num_blocks, disk.config.block_size, disk.config.num_inodes, disk.config.inode_size, reserved_space
		);
		Ok(disk)
	}

	fn open_on(mut container: C, disk_type_byte: Option<u8>) -> DiskResult<Self> {
		let mut offset = 0u64;
		if let Some(expected) = disk_type_byte {
			let tag = container.read(offset, 1)?[0];
			if tag != expected {
				return Err(DiskError::InvalidFormat(format!(
					"disk type byte {tag:#04x} does not match expected {expected:#04x}"
				)));
			}
			offset += 1;
		}

		let header = container.read(offset, SUPER_BLOCK_DATA_LENGTH * 4)?;
		let block_size = read_be(&header[0..SUPER_BLOCK_DATA_LENGTH]);
		let inode_size = read_be(&header[SUPER_BLOCK_DATA_LENGTH..2 * SUPER_BLOCK_DATA_LENGTH]);
		let num_blocks = read_be(&header[2 * SUPER_BLOCK_DATA_LENGTH..3 * SUPER_BLOCK_DATA_LENGTH]);
		let num_inodes = read_be(&header[3 * SUPER_BLOCK_DATA_LENGTH..4 * SUPER_BLOCK_DATA_LENGTH]);
		let config = Config::new(block_size, inode_size, num_blocks, num_inodes)?;
		offset += header.len() as u64;

		let inode_bitmap_offset = offset;
		let inode_bitmap = Bitmap::load_from(&mut container, inode_bitmap_offset, config.num_inodes)?;
		offset += ceil_division(config.num_inodes, 8);

		let block_bitmap_offset = offset;
		let block_bitmap = Bitmap::load_from(&mut container, block_bitmap_offset, config.num_blocks)?;
		offset += ceil_division(config.num_blocks, 8);

		let inode_table_offset = offset;
		offset += config.inode_size * config.num_inodes;
		let reserved_space = offset;

		if config.disk_size < reserved_space + config.block_size {
			return Err(DiskError::Corrupt(format!(
				"disk_size={} too small for header of {reserved_space} bytes plus one block, \
				 image may be truncated",
				config.disk_size
			)));
		}

		let num_super_blocks = ceil_division(reserved_space, config.block_size);
		for i in 0..num_super_blocks {
			if !block_bitmap.get(i)? {
				return Err(DiskError::Corrupt(format!(
					"reserved block {i} is not marked used, image may be corrupted"
				)));
			}
		}
		if !inode_bitmap.get(0)? {
			return Err(DiskError::Corrupt(
				"root inode (0) is not marked used, image may be corrupted".into(),
			));
		}

		debug!("opened disk: {} blocks x {} bytes", config.num_blocks, config.block_size);
		Ok(Self {
			container,
			config,
			inode_bitmap,
			block_bitmap,
			inode_bitmap_offset,
			block_bitmap_offset,
			inode_table_offset,
			reserved_space,
		})
	}
}

impl Disk<MemoryContainer> {
	/// Creates a fresh, unencrypted, heap-resident image with the given
	/// geometry. There is no on-disk disk-type tag to write — a heap-
	/// resident container is never reopened from bytes, so there is nothing
	/// to disambiguate it from.
	pub fn create_in_memory(config: Config) -> DiskResult<Self> {
		let container = MemoryContainer::new(config.block_size, config.num_blocks, config.inode_size, config.num_inodes);
		let mut disk = Self::create_on(container, config, None)?;
		Directory::init_root(&mut disk)?;
		Ok(disk)
	}
}

impl Disk<FileContainer> {
	/// Creates a fresh, unencrypted image at `path`. Fails if `path` already
	/// exists.
	pub fn create_file(path: impl AsRef<Path>, config: Config) -> DiskResult<Self> {
		let container = FileContainer::create(path, config.disk_size)?;
		let mut disk = Self::create_on(container, config, Some(DISK_TYPE_PLAIN))?;
		Directory::init_root(&mut disk)?;
		Ok(disk)
	}

	/// Opens an existing unencrypted image at `path`.
	pub fn open_file(path: impl AsRef<Path>) -> DiskResult<Self> {
		let container = FileContainer::open(path)?;
		Self::open_on(container, Some(DISK_TYPE_PLAIN))
	}
}

impl Disk<EncryptedFileContainer> {
	/// Creates a fresh ChaCha20-encrypted image at `path`. The container's
	/// own 45-byte header already carries the disk-type tag, a random
	/// nonce, and the password authentication tag, so the superblock is
	/// written straight to payload offset 0 with no second disk-type byte.
	pub fn create_encrypted_file(path: impl AsRef<Path>, password: &[u8], config: Config) -> DiskResult<Self> {
		let container = EncryptedFileContainer::create(path, password, config.disk_size)?;
		let mut disk = Self::create_on(container, config, None)?;
		Directory::init_root(&mut disk)?;
		Ok(disk)
	}

	/// Opens an existing encrypted image at `path`, verifying `password`
	/// against the stored header tag before trusting anything else in it.
	pub fn open_encrypted_file(path: impl AsRef<Path>, password: &[u8]) -> DiskResult<Self> {
		let container = EncryptedFileContainer::open(path, password)?;
		Self::open_on(container, None)
	}
}
