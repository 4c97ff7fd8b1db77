//! Directory entry streams and path-shaped tree operations, plus the
//! positioned file cursor handed back by [`Directory::open`].

use bitflags::bitflags;

use crate::config::MAX_NAME_LEN;
use crate::container::ByteContainer;
use crate::disk::Disk;
use crate::error::{DiskError, DiskResult};
use crate::inode::{current_time_epoch, read_be, write_be, Inode, InodeMode};

/// Width in bytes of the entry-name-length prefix. `MAX_NAME_LEN` (255)
/// always fits in one byte, so this is a constant rather than something
/// derived from `Config`.
const NAME_LEN_BYTES: usize = 1;

bitflags! {
	/// Open-mode flags for [`Directory::open`].
	///
	/// | Flag | Purpose |
	/// |---|---|
	/// | `READ` | open existing for reading |
	/// | `WRITE` | open for writing (fails if missing, unless `CREATE`) |
	/// | `APPEND` | all writes land at EOF |
	/// | `CREATE` | create the entry if it doesn't exist |
	/// | `EXCLUSIVE` | fail if it exists and `CREATE` is set |
	/// | `TRUNCATE` | truncate an existing entry to empty on open |
	pub struct FileMode: u8 {
		const READ      = 0b0000_0001;
		const WRITE     = 0b0000_0010;
		const APPEND    = 0b0000_0100;
		const CREATE    = 0b0000_1000;
		const EXCLUSIVE = 0b0001_0000;
		const TRUNCATE  = 0b0010_0000;

		const READWRITE = Self::READ.bits | Self::WRITE.bits;
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawDirEntry {
	name: Vec<u8>,
	inode_ptr: u64,
}

/// One resolved path lookup: the inode it names, plus its slot.
#[derive(Debug, Clone)]
pub struct ChildInode {
	pub inode: Inode,
	pub inode_ptr: u64,
}

/// A node in the result of [`Directory::listtree`]: either a leaf (a
/// regular file name) or a subdirectory name paired with its own listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
	File(Vec<u8>),
	Dir(Vec<u8>, Vec<TreeEntry>),
}

fn name_repr(name: &[u8]) -> String {
	String::from_utf8_lossy(name).into_owned()
}

fn reject_dot_names(name: &[u8]) -> DiskResult<()> {
	if name == b"." || name == b".." {
		return Err(DiskError::InvalidFormat(format!(
			"'{}' can't be used as a self or parent reference here",
			name_repr(name)
		)));
	}
	Ok(())
}

/// A directory: an inode of mode [`InodeMode::Directory`] plus the
/// entry-stream operations built on top of its data.
///
/// Every operation takes the owning [`Disk`] explicitly rather than holding
/// a reference to it, so a caller can hold several `Directory`s (e.g. a
/// source and a destination for `copy_tree`) without fighting the borrow
/// checker over a single shared `Disk`.
pub struct Directory {
	inode_ptr: u64,
	inode: Inode,
}

impl Directory {
	/// Wraps an already-loaded inode as a `Directory`, checking its mode.
	pub(crate) fn from_parts(inode_ptr: u64, inode: Inode) -> DiskResult<Self> {
		if inode.st_mode != InodeMode::Directory {
			return Err(DiskError::NotADirectory(format!("inode {inode_ptr}")));
		}
		Ok(Self { inode_ptr, inode })
	}

	/// This directory's inode slot. Exposed so a caller can build its own
	/// per-inode synchronization (see the crate-level docs on [`Disk`]).
	pub fn inode_ptr(&self) -> u64 {
		self.inode_ptr
	}

	/// Adds `.` and `..` entries to a freshly allocated, still-empty
	/// directory inode and persists it. Used both for the image's root
	/// (parent of itself) and for every subdirectory `mkdir` creates.
	fn init_self_and_parent<C: ByteContainer>(
		&mut self,
		disk: &mut Disk<C>,
		parent_inode_ptr: u64,
	) -> DiskResult<()> {
		self.add_entry(disk, b".", self.inode_ptr)?;
		self.add_entry(disk, b"..", parent_inode_ptr)?;
		self.write_self_inode_back(disk)
	}

	/// Finishes initializing the root directory (inode 0) right after
	/// [`Disk::create_in_memory`]/`create_file`/`create_encrypted_file`
	/// allocate its bare inode: adds `.` and `..`, both pointing at itself.
	pub(crate) fn init_root<C: ByteContainer>(disk: &mut Disk<C>) -> DiskResult<()> {
		let mut root = disk.root()?;
		root.init_self_and_parent(disk, 0)
	}

	fn write_self_inode_back<C: ByteContainer>(&self, disk: &mut Disk<C>) -> DiskResult<()> {
		disk.write_inode(self.inode_ptr, &self.inode)
	}

	fn iter_entries<C: ByteContainer>(&mut self, disk: &mut Disk<C>) -> DiskResult<Vec<RawDirEntry>> {
		// Directories are generally small; reading the whole stream at once
		// is simpler and cheaper than paging through it entry by entry.
		let data = disk.inode_io(&mut self.inode).read_at(0, None)?;
		let mut entries = Vec::new();
		let mut offset = 0usize;
		while offset < data.len() {
			let name_len = data[offset] as usize;
			offset += NAME_LEN_BYTES;
			let name = data
				.get(offset..offset + name_len)
				.ok_or_else(|| DiskError::Corrupt("directory entry truncated (name)".into()))?
				.to_vec();
			offset += name_len;

			let addr_len = disk.config().inode_addr_length as usize;
			let ptr_bytes = data
				.get(offset..offset + addr_len)
				.ok_or_else(|| DiskError::Corrupt("directory entry truncated (inode pointer)".into()))?;
			let inode_ptr = read_be(ptr_bytes);
			offset += addr_len;

			entries.push(RawDirEntry { name, inode_ptr });
		}
		Ok(entries)
	}

	fn find_entry<C: ByteContainer>(&mut self, disk: &mut Disk<C>, name: &[u8]) -> DiskResult<Option<u64>> {
		Ok(self
			.iter_entries(disk)?
			.into_iter()
			.find(|e| e.name == name)
			.map(|e| e.inode_ptr))
	}

	fn add_entry<C: ByteContainer>(&mut self, disk: &mut Disk<C>, name: &[u8], inode_ptr: u64) -> DiskResult<()> {
		if name.len() > MAX_NAME_LEN {
			return Err(DiskError::NameTooLong(name.len()));
		}
		let addr_len = disk.config().inode_addr_length as usize;
		let mut entry = Vec::with_capacity(NAME_LEN_BYTES + name.len() + addr_len);
		entry.extend(write_be(name.len() as u64, NAME_LEN_BYTES));
		entry.extend_from_slice(name);
		entry.extend(write_be(inode_ptr, addr_len));

		let pos = disk.inode_io(&mut self.inode).get_size();
		disk.inode_io(&mut self.inode).write_at(pos, &entry)?;
		Ok(())
	}

	/// Removes the entry named `name`, compacting the stream so it stays
	/// contiguous, and returns the inode slot it pointed to.
	fn remove_entry<C: ByteContainer>(&mut self, disk: &mut Disk<C>, name: &[u8]) -> DiskResult<u64> {
		let entries = self.iter_entries(disk)?;
		let mut removed = None;
		let addr_len = disk.config().inode_addr_length as usize;
		let mut new_data = Vec::new();

		for entry in entries {
			if entry.name == name {
				if removed.is_some() {
					return Err(DiskError::Corrupt(format!(
						"multiple entries named '{}'",
						name_repr(name)
					)));
				}
				removed = Some(entry.inode_ptr);
				continue;
			}
			new_data.extend(write_be(entry.name.len() as u64, NAME_LEN_BYTES));
			new_data.extend_from_slice(&entry.name);
			new_data.extend(write_be(entry.inode_ptr, addr_len));
		}

		let inode_ptr = removed.ok_or_else(|| DiskError::not_found(name_repr(name)))?;
		{
			let mut io = disk.inode_io(&mut self.inode);
			io.write_at(0, &new_data)?;
			io.truncate_to(new_data.len() as u64)?;
		}
		Ok(inode_ptr)
	}

	/// Resolves a path of names relative to this directory, returning the
	/// inode it names (directory or file) without assuming which. An empty
	/// `names` resolves to this directory itself.
	pub fn get_childs_inode<C: ByteContainer>(
		&mut self,
		disk: &mut Disk<C>,
		names: &[&[u8]],
	) -> DiskResult<Option<ChildInode>> {
		let Some((last_name, dir_names)) = names.split_last() else {
			return Ok(Some(ChildInode {
				inode: self.inode.clone(),
				inode_ptr: self.inode_ptr,
			}));
		};

		let mut current = Self {
			inode_ptr: self.inode_ptr,
			inode: self.inode.clone(),
		};
		for name in dir_names {
			if *name == b"." {
				continue;
			}
			let Some(inode_ptr) = current.find_entry(disk, name)? else {
				return Ok(None);
			};
			let inode = disk.read_inode(inode_ptr)?;
			current = Self { inode_ptr, inode };
		}

		let Some(inode_ptr) = current.find_entry(disk, last_name)? else {
			return Ok(None);
		};
		let inode = disk.read_inode(inode_ptr)?;
		Ok(Some(ChildInode { inode, inode_ptr }))
	}

	/// Entry names in this directory, in on-disk order.
	pub fn listdir<C: ByteContainer>(&mut self, disk: &mut Disk<C>, ignore_default: bool) -> DiskResult<Vec<Vec<u8>>> {
		Ok(self
			.iter_entries(disk)?
			.into_iter()
			.filter(|e| !(ignore_default && (e.name == b"." || e.name == b"..")))
			.map(|e| e.name)
			.collect())
	}

	/// A recursive listing of this directory's contents.
	pub fn listtree<C: ByteContainer>(&mut self, disk: &mut Disk<C>, ignore_default: bool) -> DiskResult<Vec<TreeEntry>> {
		let mut result = Vec::new();
		for entry in self.iter_entries(disk)? {
			if entry.name == b"." || entry.name == b".." {
				continue;
			}
			let inode = disk.read_inode(entry.inode_ptr)?;
			if inode.st_mode == InodeMode::Directory {
				let mut child = Self {
					inode_ptr: entry.inode_ptr,
					inode,
				};
				result.push(TreeEntry::Dir(entry.name, child.listtree(disk, ignore_default)?));
			} else {
				result.push(TreeEntry::File(entry.name));
			}
		}
		Ok(result)
	}

	/// Returns whether the path resolves to anything.
	pub fn exists<C: ByteContainer>(&mut self, disk: &mut Disk<C>, names: &[&[u8]]) -> DiskResult<bool> {
		Ok(self.get_childs_inode(disk, names)?.is_some())
	}

	/// `Some(true)`/`Some(false)` if the path resolves, `None` if it
	/// doesn't.
	pub fn isdir<C: ByteContainer>(&mut self, disk: &mut Disk<C>, names: &[&[u8]]) -> DiskResult<Option<bool>> {
		Ok(self
			.get_childs_inode(disk, names)?
			.map(|c| c.inode.st_mode == InodeMode::Directory))
	}

	/// `Some(true)`/`Some(false)` if the path resolves, `None` if it
	/// doesn't.
	pub fn isfile<C: ByteContainer>(&mut self, disk: &mut Disk<C>, names: &[&[u8]]) -> DiskResult<Option<bool>> {
		Ok(self
			.get_childs_inode(disk, names)?
			.map(|c| c.inode.st_mode == InodeMode::RegularFile))
	}

	/// Descends through a path of subdirectory names, `.` tolerated as a
	/// no-op component.
	pub fn chdir<C: ByteContainer>(&mut self, disk: &mut Disk<C>, names: &[&[u8]]) -> DiskResult<Self> {
		let mut current = Self {
			inode_ptr: self.inode_ptr,
			inode: self.inode.clone(),
		};
		for name in names {
			if *name == b"." {
				continue;
			}
			let inode_ptr = current
				.find_entry(disk, name)?
				.ok_or_else(|| DiskError::not_found(name_repr(name)))?;
			let inode = disk.read_inode(inode_ptr)?;
			current = Self::from_parts(inode_ptr, inode)?;
		}
		Ok(current)
	}

	/// Creates a subdirectory named `name`. If it already exists and
	/// `exist_ok` is set, returns the existing directory instead of
	/// failing.
	pub fn mkdir<C: ByteContainer>(&mut self, disk: &mut Disk<C>, name: &[u8], exist_ok: bool) -> DiskResult<Self> {
		reject_dot_names(name)?;
		if let Some(inode_ptr) = self.find_entry(disk, name)? {
			let inode = disk.read_inode(inode_ptr)?;
			if exist_ok {
				return Self::from_parts(inode_ptr, inode);
			}
			return Err(DiskError::exists(name_repr(name)));
		}

		let inode_ptr = disk.alloc_inode()?;
		let inode = Inode::new(InodeMode::Directory);
		disk.write_inode(inode_ptr, &inode)?;
		self.add_entry(disk, name, inode_ptr)?;
		self.write_self_inode_back(disk)?;

		let mut child = Self { inode_ptr, inode };
		child.init_self_and_parent(disk, self.inode_ptr)?;
		Ok(child)
	}

	/// Creates every directory along `names`, treating all but the last as
	/// `mkdir(..., exist_ok=true)`.
	pub fn makedirs<C: ByteContainer>(&mut self, disk: &mut Disk<C>, names: &[&[u8]], exist_ok: bool) -> DiskResult<Self> {
		let Some((first, rest)) = names.split_first() else {
			return Err(DiskError::InvalidFormat("makedirs requires at least one name".into()));
		};
		if rest.is_empty() {
			return self.mkdir(disk, first, exist_ok);
		}
		let mut child = self.mkdir(disk, first, true)?;
		child.makedirs(disk, rest, exist_ok)
	}

	fn create_empty_file<C: ByteContainer>(&mut self, disk: &mut Disk<C>, name: &[u8]) -> DiskResult<ChildInode> {
		let inode_ptr = disk.alloc_inode()?;
		let inode = Inode::new(InodeMode::RegularFile);
		disk.write_inode(inode_ptr, &inode)?;
		self.add_entry(disk, name, inode_ptr)?;
		self.write_self_inode_back(disk)?;
		Ok(ChildInode { inode, inode_ptr })
	}

	/// Opens (and, per `mode`, creates) the regular file named `name`.
	pub fn open<C: ByteContainer>(&mut self, disk: &mut Disk<C>, name: &[u8], mode: FileMode) -> DiskResult<FileHandle> {
		let existing = self.find_entry(disk, name)?;
		let (inode_ptr, inode) = match existing {
			None => {
				if !mode.contains(FileMode::CREATE) {
					return Err(DiskError::not_found(name_repr(name)));
				}
				if !mode.intersects(FileMode::WRITE | FileMode::APPEND) {
					return Err(DiskError::not_found(name_repr(name)));
				}
				let created = self.create_empty_file(disk, name)?;
				(created.inode_ptr, created.inode)
			}
			Some(inode_ptr) if mode.contains(FileMode::CREATE) && mode.contains(FileMode::EXCLUSIVE) => {
				return Err(DiskError::exists(name_repr(name)));
			}
			Some(inode_ptr) => {
				let inode = disk.read_inode(inode_ptr)?;
				if inode.st_mode != InodeMode::RegularFile {
					return Err(DiskError::IsADirectory(name_repr(name)));
				}
				(inode_ptr, inode)
			}
		};
		FileHandle::new(disk, inode_ptr, inode, mode)
	}

	/// Removes a regular file entry. `inode_ptr`, when given, skips the
	/// name lookup — used internally by [`Directory::rm_tree`], which
	/// already has it from its own directory scan.
	pub fn remove<C: ByteContainer>(
		&mut self,
		disk: &mut Disk<C>,
		name: &[u8],
		removed_ok: bool,
		inode_ptr: Option<u64>,
	) -> DiskResult<()> {
		let inode_ptr = match inode_ptr {
			Some(p) => p,
			None => match self.find_entry(disk, name)? {
				Some(p) => p,
				None if removed_ok => return Ok(()),
				None => return Err(DiskError::not_found(name_repr(name))),
			},
		};
		let mut inode = disk.read_inode(inode_ptr)?;
		if inode.st_mode == InodeMode::Directory {
			return Err(DiskError::IsADirectory(name_repr(name)));
		}
		disk.inode_io(&mut inode).truncate_to(0)?;
		disk.free_inode(inode_ptr)?;
		let removed = self.remove_entry(disk, name)?;
		if removed != inode_ptr {
			return Err(DiskError::Corrupt(format!(
				"removed inode {removed} did not match looked-up inode {inode_ptr}"
			)));
		}
		self.write_self_inode_back(disk)
	}

	/// Removes an empty subdirectory (only `.`/`..` left).
	pub fn rmdir<C: ByteContainer>(&mut self, disk: &mut Disk<C>, dir_name: &[u8]) -> DiskResult<()> {
		reject_dot_names(dir_name)?;
		let mut child = self.chdir(disk, &[dir_name])?;
		if child.listdir(disk, false)?.len() > 2 {
			return Err(DiskError::NotEmpty(name_repr(dir_name)));
		}
		child.remove_entry(disk, b".")?;
		child.remove_entry(disk, b"..")?;
		if disk.inode_io(&mut child.inode).get_size() != 0 {
			return Err(DiskError::Corrupt(format!(
				"directory {} not empty after removing '.'/'..'",
				name_repr(dir_name)
			)));
		}
		disk.free_inode(child.inode_ptr)?;

		let removed = self.remove_entry(disk, dir_name)?;
		if removed != child.inode_ptr {
			return Err(DiskError::Corrupt(format!(
				"removed inode {removed} did not match looked-up inode {}",
				child.inode_ptr
			)));
		}
		self.write_self_inode_back(disk)
	}

	/// Removes the leaf directory along `names`, then each of its now-empty
	/// ancestors in turn.
	pub fn removedirs<C: ByteContainer>(&mut self, disk: &mut Disk<C>, names: &[&[u8]]) -> DiskResult<()> {
		let Some((first, rest)) = names.split_first() else {
			return Err(DiskError::InvalidFormat("removedirs requires at least one name".into()));
		};
		if rest.is_empty() {
			return self.rmdir(disk, first);
		}
		let mut child = self.chdir(disk, &[first])?;
		child.removedirs(disk, rest)?;
		self.rmdir(disk, first)
	}

	/// Recursively deletes the subdirectory named `dir_name` and
	/// everything under it.
	pub fn rm_tree<C: ByteContainer>(&mut self, disk: &mut Disk<C>, dir_name: &[u8]) -> DiskResult<()> {
		reject_dot_names(dir_name)?;
		let mut child = self.chdir(disk, &[dir_name])?;
		for entry in child.iter_entries(disk)? {
			if entry.name == b"." || entry.name == b".." {
				continue;
			}
			let inode = disk.read_inode(entry.inode_ptr)?;
			if inode.st_mode == InodeMode::Directory {
				child.rm_tree(disk, &entry.name)?;
			} else {
				child.remove(disk, &entry.name, false, Some(entry.inode_ptr))?;
			}
		}
		disk.inode_io(&mut child.inode).truncate_to(0)?;
		if disk.inode_io(&mut child.inode).get_size() != 0 {
			return Err(DiskError::Corrupt(format!(
				"directory {} not empty after clearing its children",
				name_repr(dir_name)
			)));
		}
		disk.free_inode(child.inode_ptr)?;

		let removed = self.remove_entry(disk, dir_name)?;
		if removed != child.inode_ptr {
			return Err(DiskError::Corrupt(format!(
				"removed inode {removed} did not match looked-up inode {}",
				child.inode_ptr
			)));
		}
		self.write_self_inode_back(disk)
	}

	/// Moves (and optionally renames) an entry from `src` to `dest`, both
	/// paths relative to this directory. If the moved entry is a
	/// directory, its `..` is rewritten to point at the new parent.
	pub fn rename<C: ByteContainer>(
		&mut self,
		disk: &mut Disk<C>,
		src: &[&[u8]],
		dest: &[&[u8]],
		overwrite: bool,
	) -> DiskResult<()> {
		let (src_name, src_dir_names) = src.split_last().ok_or_else(|| {
			DiskError::InvalidFormat("rename requires a non-empty source path".into())
		})?;
		let (dest_name, dest_dir_names) = dest.split_last().ok_or_else(|| {
			DiskError::InvalidFormat("rename requires a non-empty destination path".into())
		})?;

		let mut src_dir = self.chdir(disk, src_dir_names)?;
		let mut dest_dir = self.chdir(disk, dest_dir_names)?;

		let inode_ptr = src_dir
			.find_entry(disk, src_name)?
			.ok_or_else(|| DiskError::not_found(name_repr(src_name)))?;
		let inode = disk.read_inode(inode_ptr)?;

		if overwrite {
			dest_dir.remove(disk, dest_name, true, None)?;
		} else if dest_dir.find_entry(disk, dest_name)?.is_some() {
			return Err(DiskError::exists(name_repr(dest_name)));
		}

		if inode.st_mode == InodeMode::Directory {
			let mut moved = src_dir.chdir(disk, &[src_name])?;
			moved.remove_entry(disk, b"..")?;
			moved.add_entry(disk, b"..", dest_dir.inode_ptr)?;
		}

		let removed = src_dir.remove_entry(disk, src_name)?;
		if removed != inode_ptr {
			return Err(DiskError::Corrupt(format!(
				"removed inode {removed} did not match looked-up inode {inode_ptr}"
			)));
		}
		dest_dir.add_entry(disk, dest_name, inode_ptr)?;

		dest_dir.write_self_inode_back(disk)?;
		src_dir.write_self_inode_back(disk)
	}

	/// Copies one regular file's bytes to a new path, in `chunk_size`-byte
	/// pieces (a whole-file read when `None`).
	pub fn copy_file<C: ByteContainer>(
		&mut self,
		disk: &mut Disk<C>,
		src: &[&[u8]],
		dest: &[&[u8]],
		overwrite: bool,
		chunk_size: Option<u64>,
	) -> DiskResult<()> {
		let (src_name, src_dir_names) = src
			.split_last()
			.ok_or_else(|| DiskError::InvalidFormat("copy_file requires a non-empty source path".into()))?;
		let (dest_name, dest_dir_names) = dest
			.split_last()
			.ok_or_else(|| DiskError::InvalidFormat("copy_file requires a non-empty destination path".into()))?;

		let mut src_dir = self.chdir(disk, src_dir_names)?;
		let mut dest_dir = self.chdir(disk, dest_dir_names)?;

		if overwrite {
			dest_dir.remove(disk, dest_name, true, None)?;
		}

		let mut dest_file = dest_dir.open(disk, dest_name, FileMode::CREATE | FileMode::WRITE | FileMode::EXCLUSIVE)?;
		let mut src_file = src_dir.open(disk, src_name, FileMode::READ)?;

		copy_stream(disk, &mut src_file, &mut dest_file, chunk_size)?;

		dest_file.close(disk)?;
		src_file.close(disk)
	}

	/// Recursively copies a directory tree to a new path. The destination
	/// directory is created (`exist_ok`) before descending.
	pub fn copy_tree<C: ByteContainer>(
		&mut self,
		disk: &mut Disk<C>,
		src: &[&[u8]],
		dest: &[&[u8]],
		overwrite: bool,
		chunk_size: Option<u64>,
	) -> DiskResult<()> {
		let (dest_dir_name, dest_parent_names) = dest
			.split_last()
			.ok_or_else(|| DiskError::InvalidFormat("copy_tree requires a non-empty destination path".into()))?;

		let mut src_dir = self.chdir(disk, src)?;
		let mut dest_parent = self.chdir(disk, dest_parent_names)?;
		let mut dest_dir = dest_parent.mkdir(disk, dest_dir_name, true)?;

		copy_tree_recursive(disk, &mut src_dir, &mut dest_dir, overwrite, chunk_size)
	}
}

fn copy_tree_recursive<C: ByteContainer>(
	disk: &mut Disk<C>,
	src_dir: &mut Directory,
	dest_dir: &mut Directory,
	overwrite: bool,
	chunk_size: Option<u64>,
) -> DiskResult<()> {
	for entry in src_dir.iter_entries(disk)? {
		if entry.name == b"." || entry.name == b".." {
			continue;
		}
		let inode = disk.read_inode(entry.inode_ptr)?;
		if inode.st_mode == InodeMode::Directory {
			let mut new_src_dir = Directory::from_parts(entry.inode_ptr, inode)?;
			let mut new_dest_dir = dest_dir.mkdir(disk, &entry.name, true)?;
			copy_tree_recursive(disk, &mut new_src_dir, &mut new_dest_dir, overwrite, chunk_size)?;
		} else {
			if overwrite {
				dest_dir.remove(disk, &entry.name, true, None)?;
			}
			let mut dest_file = dest_dir.open(disk, &entry.name, FileMode::CREATE | FileMode::WRITE | FileMode::EXCLUSIVE)?;
			let mut src_file = src_dir.open(disk, &entry.name, FileMode::READ)?;
			copy_stream(disk, &mut src_file, &mut dest_file, chunk_size)?;
			dest_file.close(disk)?;
			src_file.close(disk)?;
		}
	}
	Ok(())
}

fn copy_stream<C: ByteContainer>(
	disk: &mut Disk<C>,
	src: &mut FileHandle,
	dest: &mut FileHandle,
	chunk_size: Option<u64>,
) -> DiskResult<()> {
	loop {
		let chunk = src.read(disk, chunk_size)?;
		if chunk.is_empty() {
			return Ok(());
		}
		dest.write(disk, &chunk)?;
	}
}

/// A positioned cursor over one regular file's inode, returned by
/// [`Directory::open`].
///
/// Mirrors the open-mode rules a host `std::fs::File` would enforce, but in
/// front of this crate's own inode storage: `seek` never fails on an
/// out-of-bounds-but-non-negative offset (seeking past EOF is legal and
/// just means the next write extends the file), `read`/`write` check the
/// readable/writable flags derived from the [`FileMode`] it was opened
/// with.
pub struct FileHandle {
	inode_ptr: u64,
	inode: Inode,
	pos: u64,
	readable: bool,
	writable: bool,
	append: bool,
	closed: bool,
}

impl FileHandle {
	fn new<C: ByteContainer>(disk: &mut Disk<C>, inode_ptr: u64, mut inode: Inode, mode: FileMode) -> DiskResult<Self> {
		let readable = mode.contains(FileMode::READ);
		let writable = mode.intersects(FileMode::WRITE | FileMode::APPEND);
		let append = mode.contains(FileMode::APPEND);

		let mut pos = 0;
		if mode.contains(FileMode::TRUNCATE) {
			disk.inode_io(&mut inode).truncate_to(0)?;
			inode.st_mtime = current_time_epoch();
		} else if append {
			pos = disk.inode_io(&mut inode).get_size();
		}

		Ok(Self {
			inode_ptr,
			inode,
			pos,
			readable,
			writable,
			append,
			closed: false,
		})
	}

	/// The inode slot backing this handle.
	pub fn inode_ptr(&self) -> u64 {
		self.inode_ptr
	}

	/// Current logical size of the file.
	pub fn len(&self) -> u64 {
		self.inode.st_size
	}

	/// Whether the file is currently empty.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Current cursor position.
	pub fn tell(&self) -> u64 {
		self.pos
	}

	/// Moves the cursor to `offset` bytes from the start. Seeking past EOF
	/// is allowed; the next write extends the file with a zero-filled gap.
	pub fn seek(&mut self, offset: u64) -> DiskResult<u64> {
		if self.closed {
			return Err(DiskError::Closed);
		}
		self.pos = offset;
		Ok(self.pos)
	}

	/// Moves the cursor to `size` bytes from the current position, which
	/// may be negative to seek backwards.
	pub fn seek_relative(&mut self, delta: i64) -> DiskResult<u64> {
		if self.closed {
			return Err(DiskError::Closed);
		}
		let new_pos = self.pos as i64 + delta;
		if new_pos < 0 {
			return Err(DiskError::OutOfRange("seek before start of file".into()));
		}
		self.pos = new_pos as u64;
		Ok(self.pos)
	}

	/// Moves the cursor to `delta` bytes from end of file.
	pub fn seek_from_end(&mut self, delta: i64) -> DiskResult<u64> {
		if self.closed {
			return Err(DiskError::Closed);
		}
		let new_pos = self.inode.st_size as i64 + delta;
		if new_pos < 0 {
			return Err(DiskError::OutOfRange("seek before start of file".into()));
		}
		self.pos = new_pos as u64;
		Ok(self.pos)
	}

	/// Truncates (or extends) the file to `size` (current cursor position
	/// when `None`), returning the new size.
	pub fn truncate<C: ByteContainer>(&mut self, disk: &mut Disk<C>, size: Option<u64>) -> DiskResult<u64> {
		if self.closed {
			return Err(DiskError::Closed);
		}
		if !self.writable {
			return Err(DiskError::ReadOnly);
		}
		let size = size.unwrap_or(self.pos);
		disk.inode_io(&mut self.inode).truncate_to(size)?;
		self.inode.st_mtime = current_time_epoch();
		if self.pos > self.inode.st_size {
			self.pos = self.inode.st_size;
		}
		Ok(self.inode.st_size)
	}

	/// Reads up to `size` bytes (to EOF when `None`) from the current
	/// position, advancing the cursor by what was actually read.
	pub fn read<C: ByteContainer>(&mut self, disk: &mut Disk<C>, size: Option<u64>) -> DiskResult<Vec<u8>> {
		if self.closed {
			return Err(DiskError::Closed);
		}
		if !self.readable {
			return Err(DiskError::ReadOnly);
		}
		let data = disk.inode_io(&mut self.inode).read_at(self.pos, size)?;
		self.pos += data.len() as u64;
		Ok(data)
	}

	/// Writes `data` at the current position (or at EOF, in append mode),
	/// advancing the cursor by the number of bytes written.
	pub fn write<C: ByteContainer>(&mut self, disk: &mut Disk<C>, data: &[u8]) -> DiskResult<u64> {
		if self.closed {
			return Err(DiskError::Closed);
		}
		if !self.writable {
			return Err(DiskError::ReadOnly);
		}
		if self.append {
			self.pos = disk.inode_io(&mut self.inode).get_size();
		}
		let written = disk.inode_io(&mut self.inode).write_at(self.pos, data)?;
		self.pos += written;
		self.inode.st_mtime = current_time_epoch();
		Ok(written)
	}

	/// Persists the in-memory inode (size, pointers, timestamps) without
	/// closing the handle.
	pub fn flush<C: ByteContainer>(&self, disk: &mut Disk<C>) -> DiskResult<()> {
		if self.closed {
			return Err(DiskError::Closed);
		}
		disk.write_inode(self.inode_ptr, &self.inode)
	}

	/// Persists the inode and marks the handle closed. Idempotent.
	pub fn close<C: ByteContainer>(&mut self, disk: &mut Disk<C>) -> DiskResult<()> {
		if self.closed {
			return Ok(());
		}
		disk.write_inode(self.inode_ptr, &self.inode)?;
		self.closed = true;
		Ok(())
	}

	/// An opaque view exposing only [`FileBuffer::size`], for external
	/// collaborators (the WebDAV binding) that want a size query without a
	/// dependency on this handle's full read/write/seek surface.
	pub fn getbuffer(&self) -> FileBuffer {
		FileBuffer { size: self.inode.st_size }
	}
}

/// Opaque size-only view of a [`FileHandle`]'s backing inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBuffer {
	size: u64,
}

impl FileBuffer {
	/// Current logical size of the underlying file, in bytes.
	pub fn size(&self) -> u64 {
		self.size
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Config;

	fn test_disk() -> Disk<crate::container::MemoryContainer> {
		let config = Config::new(128, 64, 512, 64).unwrap();
		let mut disk = Disk::create_in_memory(config).unwrap();
		Directory::init_root(&mut disk).unwrap();
		disk
	}

	#[test]
	fn root_directory_has_self_and_parent_entries() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		let names = root.listdir(&mut disk, false).unwrap();
		assert_eq!(names, vec![b".".to_vec(), b"..".to_vec()]);
	}

	#[test]
	fn mkdir_then_chdir_resolves_the_new_directory() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		root.mkdir(&mut disk, b"etc", false).unwrap();
		let etc = root.chdir(&mut disk, &[b"etc".as_slice()]).unwrap();
		assert_eq!(etc.listdir(&mut disk, false).unwrap(), vec![b".".to_vec(), b"..".to_vec()]);
	}

	#[test]
	fn mkdir_without_exist_ok_rejects_duplicate_name() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		root.mkdir(&mut disk, b"etc", false).unwrap();
		assert!(matches!(root.mkdir(&mut disk, b"etc", false), Err(DiskError::AlreadyExists(_))));
		assert!(root.mkdir(&mut disk, b"etc", true).is_ok());
	}

	#[test]
	fn makedirs_creates_intermediate_directories() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		root.makedirs(&mut disk, &[b"a".as_slice(), b"b".as_slice(), b"c".as_slice()], false)
			.unwrap();
		assert!(root.exists(&mut disk, &[b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]).unwrap());
	}

	#[test]
	fn write_read_and_reopen_a_file_round_trips() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		{
			let mut f = root.open(&mut disk, b"hello.txt", FileMode::CREATE | FileMode::WRITE).unwrap();
			f.write(&mut disk, b"hello disk").unwrap();
			f.close(&mut disk).unwrap();
		}
		let mut f = root.open(&mut disk, b"hello.txt", FileMode::READ).unwrap();
		let data = f.read(&mut disk, None).unwrap();
		assert_eq!(data, b"hello disk");
	}

	#[test]
	fn remove_frees_the_inode_and_drops_the_entry() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		root.open(&mut disk, b"x", FileMode::CREATE | FileMode::WRITE)
			.unwrap()
			.close(&mut disk)
			.unwrap();
		root.remove(&mut disk, b"x", false, None).unwrap();
		assert!(!root.exists(&mut disk, &[b"x".as_slice()]).unwrap());
	}

	#[test]
	fn rmdir_rejects_non_empty_directory() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		root.mkdir(&mut disk, b"d", false).unwrap();
		{
			let mut child = root.chdir(&mut disk, &[b"d".as_slice()]).unwrap();
			child
				.open(&mut disk, b"f", FileMode::CREATE | FileMode::WRITE)
				.unwrap()
				.close(&mut disk)
				.unwrap();
		}
		assert!(matches!(root.rmdir(&mut disk, b"d"), Err(DiskError::NotEmpty(_))));
	}

	#[test]
	fn rm_tree_removes_nested_content() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		root.makedirs(&mut disk, &[b"a".as_slice(), b"b".as_slice()], false).unwrap();
		{
			let mut a = root.chdir(&mut disk, &[b"a".as_slice()]).unwrap();
			let mut b = a.chdir(&mut disk, &[b"b".as_slice()]).unwrap();
			b.open(&mut disk, b"leaf", FileMode::CREATE | FileMode::WRITE)
				.unwrap()
				.close(&mut disk)
				.unwrap();
		}
		root.rm_tree(&mut disk, b"a").unwrap();
		assert!(!root.exists(&mut disk, &[b"a".as_slice()]).unwrap());
	}

	#[test]
	fn rename_moves_entry_between_directories() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		root.mkdir(&mut disk, b"src", false).unwrap();
		root.mkdir(&mut disk, b"dst", false).unwrap();
		{
			let mut src = root.chdir(&mut disk, &[b"src".as_slice()]).unwrap();
			src.open(&mut disk, b"f", FileMode::CREATE | FileMode::WRITE)
				.unwrap()
				.close(&mut disk)
				.unwrap();
		}
		root.rename(
			&mut disk,
			&[b"src".as_slice(), b"f".as_slice()],
			&[b"dst".as_slice(), b"g".as_slice()],
			false,
		)
		.unwrap();
		assert!(!root.exists(&mut disk, &[b"src".as_slice(), b"f".as_slice()]).unwrap());
		assert!(root.exists(&mut disk, &[b"dst".as_slice(), b"g".as_slice()]).unwrap());
	}

	#[test]
	fn rename_directory_fixes_up_parent_pointer() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		root.mkdir(&mut disk, b"a", false).unwrap();
		root.mkdir(&mut disk, b"b", false).unwrap();
		root.mkdir(&mut disk, b"moveme", false).unwrap();
		root.rename(&mut disk, &[b"moveme".as_slice()], &[b"b".as_slice(), b"moveme".as_slice()], false)
			.unwrap();

		let mut b = root.chdir(&mut disk, &[b"b".as_slice()]).unwrap();
		let moved = b.chdir(&mut disk, &[b"moveme".as_slice()]).unwrap();
		let parent = moved.get_childs_inode(&mut disk, &[b"..".as_slice()]).unwrap().unwrap();
		assert_eq!(parent.inode_ptr, b.inode_ptr());
	}

	#[test]
	fn copy_file_duplicates_contents() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		let mut f = root.open(&mut disk, b"a", FileMode::CREATE | FileMode::WRITE).unwrap();
		f.write(&mut disk, b"payload").unwrap();
		f.close(&mut disk).unwrap();

		root.copy_file(&mut disk, &[b"a".as_slice()], &[b"b".as_slice()], false, None)
			.unwrap();
		let mut copy = root.open(&mut disk, b"b", FileMode::READ).unwrap();
		assert_eq!(copy.read(&mut disk, None).unwrap(), b"payload");
	}

	#[test]
	fn copy_tree_duplicates_nested_structure() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		root.makedirs(&mut disk, &[b"src".as_slice(), b"nested".as_slice()], false).unwrap();
		{
			let mut src = root.chdir(&mut disk, &[b"src".as_slice()]).unwrap();
			let mut nested = src.chdir(&mut disk, &[b"nested".as_slice()]).unwrap();
			nested
				.open(&mut disk, b"leaf", FileMode::CREATE | FileMode::WRITE)
				.unwrap()
				.close(&mut disk)
				.unwrap();
		}
		root.copy_tree(&mut disk, &[b"src".as_slice()], &[b"src_copy".as_slice()], false, None)
			.unwrap();
		assert!(root
			.exists(&mut disk, &[b"src_copy".as_slice(), b"nested".as_slice(), b"leaf".as_slice()])
			.unwrap());
	}

	#[test]
	fn name_too_long_is_rejected() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		let long_name = vec![b'a'; MAX_NAME_LEN + 1];
		assert!(matches!(
			root.mkdir(&mut disk, &long_name, false),
			Err(DiskError::NameTooLong(_))
		));
	}

	#[test]
	fn mkdir_rejects_dot_and_dotdot_as_names() {
		let mut disk = test_disk();
		let mut root = disk.root().unwrap();
		assert!(root.mkdir(&mut disk, b".", false).is_err());
		assert!(root.mkdir(&mut disk, b"..", false).is_err());
	}
}
