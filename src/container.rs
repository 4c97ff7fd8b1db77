//! Abstract random-access byte stores a [`Disk`](crate::disk::Disk) can sit
//! on top of.
//!
//! All three implementors read and write at an absolute byte offset into a
//! fixed-length address space; `Disk` never knows or cares which one it has.
//! A byte that has never been explicitly written always reads back as zero
//! — `MemoryContainer` and `FileContainer` get this for free (a freshly
//! allocated buffer/a freshly extended file are zero-filled), and
//! `EncryptedFileContainer` earns it by eagerly encrypting a zero payload
//! across its whole length up front, since ciphertext bytes that were never
//! written would otherwise decrypt to keystream noise, not zero.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::cipher::{Cipher, HkdfHmac, NONCE_LEN, TAG_LEN};
use crate::error::{DiskError, DiskResult};

/// An abstract fixed-length, randomly addressable byte store.
pub trait ByteContainer: Send {
	/// Reads `len` bytes starting at `offset`.
	fn read(&mut self, offset: u64, len: usize) -> DiskResult<Vec<u8>>;

	/// Writes `data` starting at `offset`, returning the number of bytes
	/// written (always `data.len()` on success).
	fn write(&mut self, offset: u64, data: &[u8]) -> DiskResult<usize>;

	/// Current length of the addressable space, in bytes.
	fn len(&self) -> u64;

	/// Whether the addressable space is empty.
	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Grows or shrinks the addressable space to exactly `n` bytes.
	/// Growing zero-fills the new region.
	fn truncate(&mut self, n: u64) -> DiskResult<()>;

	/// Releases any underlying resource (file descriptor, etc). Idempotent
	/// — calling it twice is not an error.
	fn close(&mut self) -> DiskResult<()>;

	/// Whether a [`Disk`](crate::disk::Disk) sitting on this container should
	/// mirror its superblock and bitmaps out to container bytes (so a closed
	/// and reopened image reconstructs them), or keep them as plain heap
	/// objects because this container never outlives the process and is
	/// never reloaded from bytes. `true` for every file-backed container;
	/// `false` for [`MemoryContainer`].
	fn mirrors_metadata(&self) -> bool {
		true
	}
}

/// Convenience helper shared by `read` methods that need to reject an
/// out-of-range access.
fn check_range(offset: u64, len: u64, total: u64) -> DiskResult<()> {
	if offset.checked_add(len).map_or(true, |end| end > total) {
		return Err(DiskError::OutOfRange(format!(
			"access [{offset}, {}) out of range for container of length {total}",
			offset + len
		)));
	}
	Ok(())
}

/// A fixed-geometry, heap-resident byte store.
///
/// Used for "in-memory disks": an image that only ever exists for the
/// lifetime of the process, with no backing file. Unlike `FileContainer`, it
/// holds blocks and inode records as separate per-slot buffers rather than
/// serializing a superblock, bitmaps, and inode table into one flat blob —
/// there is no reason to pay that layout cost when the container is never
/// read back from bytes. It still presents the usual flat `read`/`write`
/// address space to `Disk` (block pool first, inode table immediately
/// after) so the generic inode-table bookkeeping in `Disk` doesn't need a
/// separate code path; only bitmap mirroring, which this container opts out
/// of via [`ByteContainer::mirrors_metadata`], is skipped.
///
/// Every `read`/`write` call this crate ever issues stays within one block
/// or one inode slot — callers never span two — so the slot lookup below
/// never needs to stitch reads across a boundary.
pub struct MemoryContainer {
	blocks: Vec<Vec<u8>>,
	block_size: u64,
	inodes: Vec<Vec<u8>>,
	inode_size: u64,
	closed: bool,
}

impl MemoryContainer {
	/// Creates a new, all-zero container holding `num_blocks` blocks of
	/// `block_size` bytes and `num_inodes` inode records of `inode_size`
	/// bytes.
	pub fn new(block_size: u64, num_blocks: u64, inode_size: u64, num_inodes: u64) -> Self {
		Self {
			blocks: (0..num_blocks).map(|_| vec![0u8; block_size as usize]).collect(),
			block_size,
			inodes: (0..num_inodes).map(|_| vec![0u8; inode_size as usize]).collect(),
			inode_size,
			closed: false,
		}
	}

	fn blocks_len(&self) -> u64 {
		self.block_size * self.blocks.len() as u64
	}
}

impl ByteContainer for MemoryContainer {
	fn read(&mut self, offset: u64, len: usize) -> DiskResult<Vec<u8>> {
		check_range(offset, len as u64, self.len())?;
		let blocks_len = self.blocks_len();
		if offset < blocks_len {
			let block_idx = (offset / self.block_size) as usize;
			let start = (offset % self.block_size) as usize;
			return Ok(self.blocks[block_idx][start..start + len].to_vec());
		}
		let rel = offset - blocks_len;
		let inode_idx = (rel / self.inode_size) as usize;
		let start = (rel % self.inode_size) as usize;
		Ok(self.inodes[inode_idx][start..start + len].to_vec())
	}

	fn write(&mut self, offset: u64, data: &[u8]) -> DiskResult<usize> {
		check_range(offset, data.len() as u64, self.len())?;
		let blocks_len = self.blocks_len();
		if offset < blocks_len {
			let block_idx = (offset / self.block_size) as usize;
			let start = (offset % self.block_size) as usize;
			self.blocks[block_idx][start..start + data.len()].copy_from_slice(data);
			return Ok(data.len());
		}
		let rel = offset - blocks_len;
		let inode_idx = (rel / self.inode_size) as usize;
		let start = (rel % self.inode_size) as usize;
		self.inodes[inode_idx][start..start + data.len()].copy_from_slice(data);
		Ok(data.len())
	}

	fn len(&self) -> u64 {
		self.blocks_len() + self.inode_size * self.inodes.len() as u64
	}

	fn truncate(&mut self, _n: u64) -> DiskResult<()> {
		Err(DiskError::InvalidFormat(
			"an in-memory disk's block/inode geometry is fixed at creation and cannot be resized".into(),
		))
	}

	fn close(&mut self) -> DiskResult<()> {
		self.closed = true;
		Ok(())
	}

	fn mirrors_metadata(&self) -> bool {
		false
	}
}

/// A byte store backed by a regular host file.
///
/// Every access seeks then performs one `read_exact`/`write_all`, the same
/// pattern standard device and image tooling uses.
pub struct FileContainer {
	file: Option<File>,
	len: u64,
}

impl FileContainer {
	/// Creates a new file at `path` of exactly `size` bytes, zero-filled.
	/// Fails if `path` already exists.
	pub fn create(path: impl AsRef<Path>, size: u64) -> DiskResult<Self> {
		let path = path.as_ref();
		if path.exists() {
			return Err(DiskError::AlreadyExists(path.display().to_string()));
		}
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create_new(true)
			.open(path)?;
		file.set_len(size)?;
		Ok(Self {
			file: Some(file),
			len: size,
		})
	}

	/// Opens an existing file at `path` for reading and writing.
	pub fn open(path: impl AsRef<Path>) -> DiskResult<Self> {
		let path = path.as_ref();
		let file = OpenOptions::new().read(true).write(true).open(path)?;
		let len = file.metadata()?.len();
		Ok(Self {
			file: Some(file),
			len,
		})
	}

	fn file_mut(&mut self) -> DiskResult<&mut File> {
		self.file.as_mut().ok_or(DiskError::Closed)
	}
}

impl ByteContainer for FileContainer {
	fn read(&mut self, offset: u64, len: usize) -> DiskResult<Vec<u8>> {
		check_range(offset, len as u64, self.len)?;
		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(offset))?;
		let mut buf = vec![0u8; len];
		file.read_exact(&mut buf)?;
		Ok(buf)
	}

	fn write(&mut self, offset: u64, data: &[u8]) -> DiskResult<usize> {
		check_range(offset, data.len() as u64, self.len)?;
		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(offset))?;
		file.write_all(data)?;
		Ok(data.len())
	}

	fn len(&self) -> u64 {
		self.len
	}

	fn truncate(&mut self, n: u64) -> DiskResult<()> {
		let file = self.file_mut()?;
		file.set_len(n)?;
		self.len = n;
		Ok(())
	}

	fn close(&mut self) -> DiskResult<()> {
		self.file = None;
		Ok(())
	}
}

/// The unencrypted 45-byte header every encrypted image starts with:
/// a one-byte disk-type tag, a 12-byte nonce, and a 32-byte authentication
/// tag over that nonce.
const HEADER_LEN: u64 = 1 + NONCE_LEN as u64 + TAG_LEN as u64;

/// Disk-type tag for a ChaCha20-encrypted image, stored as the first byte
/// of the file.
pub const DISK_TYPE_CHACHA20_ENCRYPTED: u8 = 0x01;

/// Size, in bytes, of one chunk processed at a time when eagerly
/// encrypting a freshly created or extended region.
const ZERO_FILL_CHUNK: usize = 64 * 1024;

/// A [`FileContainer`] whose payload (everything past the 45-byte header)
/// is ChaCha20-encrypted under a password, with the header authenticated
/// by [`HkdfHmac`].
///
/// Offsets passed to [`ByteContainer::read`]/[`ByteContainer::write`] are
/// relative to the start of the payload, not the file: offset `0` here is
/// file offset `HEADER_LEN`.
pub struct EncryptedFileContainer {
	inner: FileContainer,
	password: Vec<u8>,
	nonce: [u8; NONCE_LEN],
	payload_len: u64,
}

impl EncryptedFileContainer {
	/// Creates a new encrypted image at `path` holding `payload_len` bytes
	/// of logical (plaintext) payload, and eagerly encrypts a zero payload
	/// across the whole length so every offset reads back as zero until
	/// something overwrites it.
	pub fn create(path: impl AsRef<Path>, password: &[u8], payload_len: u64) -> DiskResult<Self> {
		let nonce = crate::cipher::generate_nonce();
		let tag = HkdfHmac::make(password, &nonce);

		let mut inner = FileContainer::create(path, HEADER_LEN + payload_len)?;
		let mut header = Vec::with_capacity(HEADER_LEN as usize);
		header.push(DISK_TYPE_CHACHA20_ENCRYPTED);
		header.extend_from_slice(&nonce);
		header.extend_from_slice(&tag);
		inner.write(0, &header)?;

		let mut container = Self {
			inner,
			password: password.to_vec(),
			nonce,
			payload_len: 0,
		};
		container.zero_fill(0, payload_len)?;
		container.payload_len = payload_len;
		Ok(container)
	}

	/// Opens an existing encrypted image at `path`, verifying `password`
	/// against the stored header tag.
	pub fn open(path: impl AsRef<Path>, password: &[u8]) -> DiskResult<Self> {
		let mut inner = FileContainer::open(path)?;
		let header = inner.read(0, HEADER_LEN as usize)?;
		let disk_type = header[0];
		if disk_type != DISK_TYPE_CHACHA20_ENCRYPTED {
			return Err(DiskError::InvalidFormat(format!(
				"unsupported disk type byte {disk_type:#04x}, expected ChaCha20-encrypted \
				 ({DISK_TYPE_CHACHA20_ENCRYPTED:#04x})"
			)));
		}
		let mut nonce = [0u8; NONCE_LEN];
		nonce.copy_from_slice(&header[1..1 + NONCE_LEN]);
		let mut tag = [0u8; TAG_LEN];
		tag.copy_from_slice(&header[1 + NONCE_LEN..]);
		HkdfHmac::verify(password, &nonce, &tag)?;

		let payload_len = inner.len() - HEADER_LEN;
		Ok(Self {
			inner,
			password: password.to_vec(),
			nonce,
			payload_len,
		})
	}

	fn cipher(&self) -> Cipher {
		Cipher::new(&self.password, &self.nonce)
	}

	/// Encrypts an all-zero payload of `len` bytes starting at payload
	/// offset `offset`, in fixed-size chunks, so growing a multi-gigabyte
	/// image doesn't require a multi-gigabyte buffer.
	fn zero_fill(&mut self, offset: u64, len: u64) -> DiskResult<()> {
		let mut cipher = self.cipher();
		cipher.seek(offset);
		let mut remaining = len;
		let mut pos = offset;
		let zeros = [0u8; ZERO_FILL_CHUNK];
		while remaining > 0 {
			let chunk = remaining.min(ZERO_FILL_CHUNK as u64) as usize;
			let mut buf = zeros[..chunk].to_vec();
			cipher.apply(&mut buf);
			self.inner.write(HEADER_LEN + pos, &buf)?;
			pos += chunk as u64;
			remaining -= chunk as u64;
		}
		Ok(())
	}
}

impl ByteContainer for EncryptedFileContainer {
	fn read(&mut self, offset: u64, len: usize) -> DiskResult<Vec<u8>> {
		check_range(offset, len as u64, self.payload_len)?;
		let mut buf = self.inner.read(HEADER_LEN + offset, len)?;
		let mut cipher = self.cipher();
		cipher.seek(offset);
		cipher.apply(&mut buf);
		Ok(buf)
	}

	fn write(&mut self, offset: u64, data: &[u8]) -> DiskResult<usize> {
		check_range(offset, data.len() as u64, self.payload_len)?;
		let mut buf = data.to_vec();
		let mut cipher = self.cipher();
		cipher.seek(offset);
		cipher.apply(&mut buf);
		self.inner.write(HEADER_LEN + offset, &buf)
	}

	fn len(&self) -> u64 {
		self.payload_len
	}

	fn truncate(&mut self, n: u64) -> DiskResult<()> {
		self.inner.truncate(HEADER_LEN + n)?;
		if n > self.payload_len {
			self.zero_fill(self.payload_len, n - self.payload_len)?;
		}
		self.payload_len = n;
		Ok(())
	}

	fn close(&mut self) -> DiskResult<()> {
		self.inner.close()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn memory_container_reads_back_what_it_wrote() {
		let mut c = MemoryContainer::new(32, 2, 16, 2);
		c.write(10, b"hello").unwrap();
		assert_eq!(c.read(10, 5).unwrap(), b"hello");
		assert_eq!(c.read(0, 10).unwrap(), vec![0u8; 10]);
	}

	#[test]
	fn memory_container_reads_back_inode_region_past_the_block_pool() {
		// block pool is 2*32=64 bytes; the inode table starts right after.
		let mut c = MemoryContainer::new(32, 2, 16, 2);
		c.write(64, b"inode-one").unwrap();
		assert_eq!(c.read(64, 9).unwrap(), b"inode-one");
		assert_eq!(c.read(80, 9).unwrap(), vec![0u8; 9]);
	}

	#[test]
	fn memory_container_rejects_out_of_range() {
		let mut c = MemoryContainer::new(4, 1, 4, 1);
		assert!(c.read(4, 8).is_err());
		assert!(c.write(4, &[0u8; 8]).is_err());
	}

	#[test]
	fn memory_container_does_not_mirror_metadata() {
		let c = MemoryContainer::new(4, 1, 4, 1);
		assert!(!c.mirrors_metadata());
	}

	#[test]
	fn memory_container_rejects_truncate() {
		let mut c = MemoryContainer::new(4, 1, 4, 1);
		assert!(c.truncate(16).is_err());
	}

	#[test]
	fn file_container_round_trips_through_tempfile() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("image.bin");
		{
			let mut c = FileContainer::create(&path, 1024).unwrap();
			c.write(100, b"payload").unwrap();
			c.close().unwrap();
		}
		let mut reopened = FileContainer::open(&path).unwrap();
		assert_eq!(reopened.read(100, 7).unwrap(), b"payload");
		assert_eq!(reopened.read(0, 10).unwrap(), vec![0u8; 10]);
	}

	#[test]
	fn file_container_create_rejects_existing_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("image.bin");
		FileContainer::create(&path, 16).unwrap();
		assert!(FileContainer::create(&path, 16).is_err());
	}

	#[test]
	fn encrypted_container_round_trips_and_zero_fills() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("enc.bin");
		{
			let mut c = EncryptedFileContainer::create(&path, b"hunter2", 256).unwrap();
			c.write(50, b"secret").unwrap();
			c.close().unwrap();
		}
		let mut reopened = EncryptedFileContainer::open(&path, b"hunter2").unwrap();
		assert_eq!(reopened.read(50, 6).unwrap(), b"secret");
		assert_eq!(reopened.read(0, 10).unwrap(), vec![0u8; 10]);
	}

	#[test]
	fn encrypted_container_rejects_wrong_password() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("enc.bin");
		EncryptedFileContainer::create(&path, b"right", 64)
			.unwrap()
			.close()
			.unwrap();
		assert!(matches!(
			EncryptedFileContainer::open(&path, b"wrong"),
			Err(DiskError::AuthenticationFailed)
		));
	}

	#[test]
	fn encrypted_container_grow_zero_fills_new_region() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("enc.bin");
		let mut c = EncryptedFileContainer::create(&path, b"pw", 32).unwrap();
		c.write(0, b"0123456789012345678901234567ab").unwrap();
		c.truncate(64).unwrap();
		assert_eq!(c.read(32, 10).unwrap(), vec![0u8; 10]);
	}
}
