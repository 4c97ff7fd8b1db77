//! End-to-end scenarios exercised against the public crate surface rather
//! than a single module: round-trip persistence across close/reopen of a
//! real file-backed image, and the literal worked examples that motivated
//! this crate's design.

use virtual_disk::{Config, Disk, FileMode};

fn small_config() -> Config {
	Config::new(1024, 48, 1024, 1024).unwrap()
}

#[test]
fn scenario_write_read_remove_frees_pool_slots() {
	// Config{1024,48,1024,1024}: one data block (index 0) is reserved so a
	// real block address never collides with NULL_PTR, and the root
	// directory's own "."/".." entries occupy a second block the moment the
	// disk is created — so a fresh in-memory disk already sits at 1022 free
	// blocks, not 1023, before any user file touches it. The root inode
	// itself permanently claims inode slot 0, so 1023 of 1024 inodes are
	// free from creation onward.
	let config = small_config();
	let mut disk = Disk::create_in_memory(config).unwrap();
	assert_eq!(disk.free_space(), 1022 * config.block_size);
	let mut root = disk.root().unwrap();

	let mut f = root
		.open(&mut disk, b"hello.txt", FileMode::CREATE | FileMode::WRITE)
		.unwrap();
	f.write(&mut disk, b"hello").unwrap();
	f.close(&mut disk).unwrap();
	assert_eq!(disk.free_space(), 1021 * config.block_size);

	let mut f = root.open(&mut disk, b"hello.txt", FileMode::READ).unwrap();
	assert_eq!(f.read(&mut disk, None).unwrap(), b"hello");
	f.close(&mut disk).unwrap();

	root.remove(&mut disk, b"hello.txt", false, None).unwrap();
	assert_eq!(disk.free_space(), 1022 * config.block_size);
}

#[test]
fn scenario_mkdir_write_and_listtree() {
	let config = small_config();
	let mut disk = Disk::create_in_memory(config).unwrap();
	let mut root = disk.root().unwrap();

	root.mkdir(&mut disk, b"home", false).unwrap();
	{
		let mut home = root.chdir(&mut disk, &[b"home".as_slice()]).unwrap();
		let mut f = home
			.open(&mut disk, b"home.txt", FileMode::CREATE | FileMode::WRITE)
			.unwrap();
		f.write(&mut disk, b"hii i am laksh").unwrap();
		f.close(&mut disk).unwrap();
	}

	let tree = root.listtree(&mut disk, true).unwrap();
	assert_eq!(tree.len(), 1);
	match &tree[0] {
		virtual_disk::TreeEntry::Dir(name, children) => {
			assert_eq!(name, b"home");
			assert_eq!(children.len(), 1);
			assert!(matches!(&children[0], virtual_disk::TreeEntry::File(n) if n == b"home.txt"));
		}
		_ => panic!("expected a directory entry"),
	}
}

#[test]
fn scenario_copy_tree_preserves_contents() {
	let config = small_config();
	let mut disk = Disk::create_in_memory(config).unwrap();
	let mut root = disk.root().unwrap();

	root.mkdir(&mut disk, b"home", false).unwrap();
	{
		let mut home = root.chdir(&mut disk, &[b"home".as_slice()]).unwrap();
		let mut f = home
			.open(&mut disk, b"home.txt", FileMode::CREATE | FileMode::WRITE)
			.unwrap();
		f.write(&mut disk, b"hii i am laksh").unwrap();
		f.close(&mut disk).unwrap();
	}

	root.copy_tree(&mut disk, &[b"home".as_slice()], &[b"src".as_slice()], false, None)
		.unwrap();

	let mut src = root.chdir(&mut disk, &[b"src".as_slice()]).unwrap();
	let names = src.listdir(&mut disk, true).unwrap();
	assert_eq!(names, vec![b"home.txt".to_vec()]);

	let mut f = src.open(&mut disk, b"home.txt", FileMode::READ).unwrap();
	assert_eq!(f.read(&mut disk, None).unwrap(), b"hii i am laksh");
}

#[test]
fn scenario_large_file_round_trips_across_reopen() {
	let config = Config::new(4096, 64, 65536, 65536).unwrap();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("big.vdisk");

	// 8 MiB rather than 200 MiB so the test suite stays fast; the code path
	// (many direct + single + double indirect blocks, written and read back
	// in fixed-size chunks) is identical at either size.
	let chunk = vec![0xABu8; 1024 * 1024];
	let total_chunks = 8;

	{
		let mut disk = Disk::create_file(&path, config).unwrap();
		let mut root = disk.root().unwrap();
		let mut f = root
			.open(&mut disk, b"big.bin", FileMode::CREATE | FileMode::WRITE)
			.unwrap();
		for _ in 0..total_chunks {
			f.write(&mut disk, &chunk).unwrap();
		}
		f.close(&mut disk).unwrap();
		disk.close().unwrap();
	}

	let mut disk = Disk::open_file(&path).unwrap();
	let mut root = disk.root().unwrap();
	let mut f = root.open(&mut disk, b"big.bin", FileMode::READ).unwrap();
	let mut total = Vec::new();
	loop {
		let part = f.read(&mut disk, Some(1024 * 1024)).unwrap();
		if part.is_empty() {
			break;
		}
		total.extend(part);
	}
	assert_eq!(total.len(), chunk.len() * total_chunks);
	assert!(total.chunks(chunk.len()).all(|c| c == chunk.as_slice()));
}

#[test]
fn scenario_truncate_to_zero_frees_indirection_blocks() {
	let config = Config::new(1024, 48, 1024, 1024).unwrap();
	let mut disk = Disk::create_in_memory(config).unwrap();
	let free_after_init = disk.free_space();

	let mut root = disk.root().unwrap();
	let pattern: Vec<u8> = (0..255u32).map(|v| (v % 255) as u8).collect();
	let payload: Vec<u8> = pattern.iter().cloned().cycle().take(1024 * 1024).collect();

	let mut f = root
		.open(&mut disk, b"pattern.bin", FileMode::CREATE | FileMode::WRITE)
		.unwrap();
	f.write(&mut disk, &payload).unwrap();
	assert!(disk.free_space() < free_after_init);
	f.truncate(&mut disk, Some(0)).unwrap();
	f.close(&mut disk).unwrap();

	assert_eq!(disk.free_space(), free_after_init);
}

#[test]
fn scenario_encrypted_backend_round_trips_and_rejects_wrong_password() {
	let config = Config::new(1024, 48, 1024, 1024).unwrap();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("secret.vdisk");

	{
		let mut disk = Disk::create_encrypted_file(&path, b"pw", config).unwrap();
		let mut root = disk.root().unwrap();
		let mut f = root
			.open(&mut disk, b"secret.txt", FileMode::CREATE | FileMode::WRITE)
			.unwrap();
		f.write(&mut disk, b"secret").unwrap();
		f.close(&mut disk).unwrap();
		disk.close().unwrap();
	}

	let raw = std::fs::read(&path).unwrap();
	let haystack = b"secret";
	assert!(
		!raw.windows(haystack.len()).any(|w| w == haystack),
		"plaintext must never appear in the encrypted image"
	);

	assert!(virtual_disk::Disk::open_encrypted_file(&path, b"wrong").is_err());

	let mut disk = Disk::open_encrypted_file(&path, b"pw").unwrap();
	let mut root = disk.root().unwrap();
	let mut f = root.open(&mut disk, b"secret.txt", FileMode::READ).unwrap();
	assert_eq!(f.read(&mut disk, None).unwrap(), b"secret");
}
