//! Logical-offset-to-physical-block mapping: the direct/indirect pointer
//! tree walk, on-demand allocation, and truncation.

use log::trace;

use crate::bitmap::Bitmap;
use crate::config::{Config, NUM_DIRECT_PTRS};
use crate::container::ByteContainer;
use crate::error::{DiskError, DiskResult};
use crate::inode::{read_be, write_be, Inode, NULL_PTR};
use crate::util::ceil_division;

/// Block-level I/O and allocation, bound to one disk's container and block
/// bitmap. `InodeIO` is built on top of this for everything that needs to
/// reason about logical file offsets rather than raw block indices.
pub struct BlockAccess<'a> {
	container: &'a mut dyn ByteContainer,
	block_bitmap: &'a mut Bitmap,
	blocks_offset: u64,
	block_bitmap_offset: u64,
	block_size: u64,
}

impl<'a> BlockAccess<'a> {
	pub fn new(
		container: &'a mut dyn ByteContainer,
		block_bitmap: &'a mut Bitmap,
		blocks_offset: u64,
		block_bitmap_offset: u64,
		block_size: u64,
	) -> Self {
		Self {
			container,
			block_bitmap,
			blocks_offset,
			block_bitmap_offset,
			block_size,
		}
	}

	fn byte_offset(&self, block_ptr: u64) -> u64 {
		self.blocks_offset + block_ptr * self.block_size
	}

	fn read_block(&mut self, block_ptr: u64) -> DiskResult<Vec<u8>> {
		self.container
			.read(self.byte_offset(block_ptr), self.block_size as usize)
	}

	fn read_block_range(&mut self, block_ptr: u64, start: usize, len: usize) -> DiskResult<Vec<u8>> {
		self.container.read(self.byte_offset(block_ptr) + start as u64, len)
	}

	fn write_block_range(&mut self, block_ptr: u64, start: usize, data: &[u8]) -> DiskResult<()> {
		self.container
			.write(self.byte_offset(block_ptr) + start as u64, data)?;
		Ok(())
	}

	fn zero_block(&mut self, block_ptr: u64) -> DiskResult<()> {
		let zeros = vec![0u8; self.block_size as usize];
		self.write_block_range(block_ptr, 0, &zeros)
	}

	/// Finds a free block, marks it used, and mirrors the bit to the
	/// container if the backend wants that. Does not zero the block's
	/// contents.
	pub fn alloc_block(&mut self) -> DiskResult<u64> {
		let ptr = if self.container.mirrors_metadata() {
			self.block_bitmap
				.find_and_flip_free_in(self.container, self.block_bitmap_offset)?
		} else {
			self.block_bitmap.find_and_flip_free()?
		};
		trace!("allocated block {ptr}");
		Ok(ptr)
	}

	fn free_block(&mut self, block_ptr: u64) -> DiskResult<()> {
		if self.container.mirrors_metadata() {
			self.block_bitmap
				.clear_in(self.container, self.block_bitmap_offset, block_ptr)?;
		} else {
			self.block_bitmap.clear(block_ptr)?;
		}
		trace!("freed block {block_ptr}");
		Ok(())
	}
}

/// Logical-offset view of one inode's data, layered on its owning disk's
/// block store.
pub struct InodeIO<'a, 'b> {
	inode: &'a mut Inode,
	config: &'a Config,
	blocks: BlockAccess<'b>,
}

impl<'a, 'b> InodeIO<'a, 'b> {
	pub fn new(inode: &'a mut Inode, config: &'a Config, blocks: BlockAccess<'b>) -> Self {
		Self {
			inode,
			config,
			blocks,
		}
	}

	pub fn get_size(&self) -> u64 {
		self.inode.st_size
	}

	/// Reads up to `n` bytes starting at `pos` (to EOF if `n` is `None`).
	/// Returns an empty vector if `pos` is at or past the current size.
	pub fn read_at(&mut self, pos: u64, n: Option<u64>) -> DiskResult<Vec<u8>> {
		let size = self.inode.st_size;
		if pos >= size {
			return Ok(Vec::new());
		}
		let n = match n {
			Some(v) => v.min(size - pos),
			None => size - pos,
		};
		if n == 0 {
			return Ok(Vec::new());
		}

		let block_size = self.config.block_size;
		let start_block = pos / block_size;
		let end_block = ceil_division(pos + n, block_size);

		let ptrs = self.iter_blocks()?;
		let mut out = Vec::with_capacity(((end_block - start_block) * block_size) as usize);
		for idx in start_block..end_block {
			let ptr = *ptrs.get(idx as usize).ok_or_else(|| {
				DiskError::Corrupt(format!("block {idx} missing for inode of size {size}"))
			})?;
			out.extend(self.blocks.read_block(ptr)?);
		}

		let start_off = (pos % block_size) as usize;
		out.truncate(start_off + n as usize);
		Ok(out.split_off(start_off))
	}

	/// Writes `data` starting at `pos`, zero-filling any gap if `pos` is
	/// past the current size first. Returns the number of bytes written
	/// (always `data.len()`, short of hitting [`DiskError::Full`]).
	pub fn write_at(&mut self, pos: u64, data: &[u8]) -> DiskResult<u64> {
		if pos > self.inode.st_size {
			let gap = pos - self.inode.st_size;
			let gap_start = self.inode.st_size;
			let zeros = vec![0u8; gap as usize];
			self.write_at(gap_start, &zeros)?;
		}
		if data.is_empty() {
			return Ok(0);
		}

		let block_size = self.config.block_size;
		let mut written = 0u64;
		let mut remaining = data.len() as u64;
		let mut cur_pos = pos;
		let mut block_idx = pos / block_size;

		let ptrs = self.iter_blocks()?;

		while remaining > 0 {
			let block_off = (cur_pos % block_size) as usize;
			let to_write = ((block_size as usize - block_off) as u64).min(remaining) as usize;

			// A newly allocated block's data is written before its pointer
			// is threaded into the inode/indirection tree: a crash between
			// the two leaves the block allocated but unreachable (a leak,
			// recoverable by a future scan), never a pointer to a block
			// whose contents were never actually written.
			let existing = ptrs.get(block_idx as usize).copied();
			let ptr = match existing {
				Some(ptr) => ptr,
				None => self.blocks.alloc_block()?,
			};

			self.blocks
				.write_block_range(ptr, block_off, &data[written as usize..written as usize + to_write])?;

			if existing.is_none() {
				self.set_block_ptr(block_idx, ptr)?;
			}

			written += to_write as u64;
			remaining -= to_write as u64;
			cur_pos += to_write as u64;
			block_idx += 1;
		}

		let new_size = pos + written;
		if new_size > self.inode.st_size {
			self.inode.st_size = new_size;
		}
		Ok(written)
	}

	/// Shrinks or grows the logical size to `new_size`, freeing every
	/// block (and, recursively, every indirection block left empty) at or
	/// beyond the new block count. Growing past the current size changes
	/// only `size`; bytes in between are defined as zero by the container
	/// contract, not by an explicit fill here.
	pub fn truncate_to(&mut self, new_size: u64) -> DiskResult<()> {
		let blocks_needed = ceil_division(new_size, self.config.block_size);
		self.truncate_blocks(blocks_needed)?;
		self.inode.st_size = new_size;
		Ok(())
	}

	/// Currently-allocated physical block addresses, in logical order.
	/// Stops at the first absent slot — a file's blocks are always
	/// contiguous by construction, so this is the complete set.
	pub fn iter_blocks(&mut self) -> DiskResult<Vec<u64>> {
		let mut out = Vec::new();
		for &direct in &self.inode.directs {
			if direct == NULL_PTR {
				return Ok(out);
			}
			out.push(direct);
		}

		if self.inode.indirect == NULL_PTR {
			return Ok(out);
		}
		self.collect_indirect(self.inode.indirect, 1, &mut out)?;

		if self.inode.double_indirect == NULL_PTR {
			return Ok(out);
		}
		self.collect_indirect(self.inode.double_indirect, 2, &mut out)?;

		if self.inode.triple_indirect == NULL_PTR {
			return Ok(out);
		}
		self.collect_indirect(self.inode.triple_indirect, 3, &mut out)?;

		Ok(out)
	}

	fn collect_indirect(&mut self, ptr: u64, depth: u32, out: &mut Vec<u64>) -> DiskResult<()> {
		if ptr == NULL_PTR {
			return Ok(());
		}
		let addr_len = self.config.block_addr_length as usize;
		let data = self.blocks.read_block(ptr)?;

		if depth == 1 {
			for idx in 0..self.config.addrs_per_block {
				let off = (idx as usize) * addr_len;
				let child = read_be(&data[off..off + addr_len]);
				if child == NULL_PTR {
					return Ok(());
				}
				out.push(child);
			}
			return Ok(());
		}

		// At depth > 1 a single absent child does not end the whole walk:
		// every slot in this block is visited regardless, matching the
		// allocator's own lazy, left-to-right fill order.
		for idx in 0..self.config.addrs_per_block {
			let off = (idx as usize) * addr_len;
			let child = read_be(&data[off..off + addr_len]);
			self.collect_indirect(child, depth - 1, out)?;
		}
		Ok(())
	}

	fn set_block_ptr(&mut self, idx: u64, value: u64) -> DiskResult<()> {
		if idx < NUM_DIRECT_PTRS {
			self.inode.directs[idx as usize] = value;
			return Ok(());
		}
		let mut idx = idx - NUM_DIRECT_PTRS;
		let a = self.config.addrs_per_block;

		if idx < a {
			let root = self.ensure_indirect_root(1)?;
			return self.set_ptr_recursive(root, idx, 1, value);
		}
		idx -= a;

		if idx < self.config.double_range {
			let root = self.ensure_indirect_root(2)?;
			return self.set_ptr_recursive(root, idx, 2, value);
		}
		idx -= self.config.double_range;

		if idx < self.config.triple_range {
			let root = self.ensure_indirect_root(3)?;
			return self.set_ptr_recursive(root, idx, 3, value);
		}

		Err(DiskError::OutOfRange(format!(
			"logical block index beyond max_file_size ({} bytes)",
			self.config.max_file_size
		)))
	}

	fn ensure_indirect_root(&mut self, level: u32) -> DiskResult<u64> {
		let existing = match level {
			1 => self.inode.indirect,
			2 => self.inode.double_indirect,
			3 => self.inode.triple_indirect,
			_ => unreachable!("indirection level must be 1..=3"),
		};
		if existing != NULL_PTR {
			return Ok(existing);
		}
		let ptr = self.blocks.alloc_block()?;
		self.blocks.zero_block(ptr)?;
		match level {
			1 => self.inode.indirect = ptr,
			2 => self.inode.double_indirect = ptr,
			3 => self.inode.triple_indirect = ptr,
			_ => unreachable!("indirection level must be 1..=3"),
		}
		trace!("allocated level-{level} indirection block {ptr}");
		Ok(ptr)
	}

	fn set_ptr_recursive(&mut self, indirect: u64, idx: u64, depth: u32, value: u64) -> DiskResult<()> {
		let addr_len = self.config.block_addr_length as usize;

		if depth == 1 {
			let off = (idx as usize) * addr_len;
			self.blocks.write_block_range(indirect, off, &write_be(value, addr_len))?;
			return Ok(());
		}

		let fan = if depth == 2 {
			self.config.addrs_per_block
		} else {
			self.config.double_range
		};
		let idx_lvl1 = idx / fan;
		let idx_lvl2 = idx % fan;
		let off_lvl1 = (idx_lvl1 as usize) * addr_len;

		let slot = self.blocks.read_block_range(indirect, off_lvl1, addr_len)?;
		let mut ptr_lvl1 = read_be(&slot);
		if ptr_lvl1 == NULL_PTR {
			let child = self.blocks.alloc_block()?;
			self.blocks.zero_block(child)?;
			self.blocks
				.write_block_range(indirect, off_lvl1, &write_be(child, addr_len))?;
			ptr_lvl1 = child;
			trace!("allocated level-{depth} indirection block {ptr_lvl1}");
		}
		self.set_ptr_recursive(ptr_lvl1, idx_lvl2, depth - 1, value)
	}

	fn truncate_blocks(&mut self, blocks_needed: u64) -> DiskResult<()> {
		trace!("truncating to {blocks_needed} blocks");
		let mut remaining = blocks_needed;

		for idx in 0..NUM_DIRECT_PTRS as usize {
			let ptr = self.inode.directs[idx];
			if ptr == NULL_PTR {
				return Ok(());
			}
			if remaining == 0 {
				// Clear the pointer slot before the bitmap bit: a crash
				// between the two leaves the block allocated but
				// unreferenced (a leak), never a stale pointer to a block
				// the bitmap already considers free and reallocatable.
				self.inode.directs[idx] = NULL_PTR;
				self.blocks.free_block(ptr)?;
			}
			remaining = remaining.saturating_sub(1);
		}

		if self.inode.indirect == NULL_PTR {
			return Ok(());
		}
		if self.truncate_indirect(self.inode.indirect, 1, &mut remaining)? {
			let ptr = self.inode.indirect;
			self.inode.indirect = NULL_PTR;
			self.blocks.free_block(ptr)?;
			trace!("freed level-1 indirection block {ptr}");
		}

		if self.inode.double_indirect == NULL_PTR {
			return Ok(());
		}
		if self.truncate_indirect(self.inode.double_indirect, 2, &mut remaining)? {
			let ptr = self.inode.double_indirect;
			self.inode.double_indirect = NULL_PTR;
			self.blocks.free_block(ptr)?;
			trace!("freed level-2 indirection block {ptr}");
		}

		if self.inode.triple_indirect == NULL_PTR {
			return Ok(());
		}
		if self.truncate_indirect(self.inode.triple_indirect, 3, &mut remaining)? {
			let ptr = self.inode.triple_indirect;
			self.inode.triple_indirect = NULL_PTR;
			self.blocks.free_block(ptr)?;
			trace!("freed level-3 indirection block {ptr}");
		}

		Ok(())
	}

	/// Frees every data block at or beyond `*remaining` blocks from now,
	/// walking `ptr`'s subtree depth-first. Returns whether every slot in
	/// `ptr` itself ended up absent, so the caller can free `ptr` too.
	fn truncate_indirect(&mut self, ptr: u64, depth: u32, remaining: &mut u64) -> DiskResult<bool> {
		let addr_len = self.config.block_addr_length as usize;
		let data = self.blocks.read_block(ptr)?;

		if depth == 1 {
			let mut is_empty = true;
			for idx in 0..self.config.addrs_per_block {
				let off = (idx as usize) * addr_len;
				let child = read_be(&data[off..off + addr_len]);
				if child == NULL_PTR {
					return Ok(is_empty);
				}
				if *remaining == 0 {
					// Zero the slot before clearing the bitmap bit, same
					// leak-not-corrupt ordering as the direct pointers.
					self.blocks.write_block_range(ptr, off, &vec![0u8; addr_len])?;
					self.blocks.free_block(child)?;
				} else {
					is_empty = false;
				}
				*remaining = remaining.saturating_sub(1);
			}
			return Ok(is_empty);
		}

		let mut is_empty = true;
		for idx in 0..self.config.addrs_per_block {
			let off = (idx as usize) * addr_len;
			let child = read_be(&data[off..off + addr_len]);
			if child == NULL_PTR {
				return Ok(is_empty);
			}
			let child_empty = self.truncate_indirect(child, depth - 1, remaining)?;
			if child_empty {
				self.blocks.write_block_range(ptr, off, &vec![0u8; addr_len])?;
				self.blocks.free_block(child)?;
			} else {
				is_empty = false;
			}
		}
		Ok(is_empty)
	}
}
