//! Eviction-engine behavior: victim choice under both built-in
//! policies, in-use protection, and the create-into-full-directory
//! path.

use qfs_block::{BlockDevice, ByteBlockDevice, MemoryByteDevice};
use qfs_core::{mkfs, LargestSize, OldestMtime, QuicheFs};
use qfs_error::QfsError;
use qfs_types::{InodeNumber, BLOCK_SIZE, MAX_SUBFILES, ROOT_INO};
use std::sync::Arc;

fn fresh_fs(blocks: usize) -> QuicheFs {
    let dev: Arc<dyn BlockDevice> = Arc::new(
        ByteBlockDevice::new(
            MemoryByteDevice::new(blocks * BLOCK_SIZE),
            BLOCK_SIZE as u32,
        )
        .unwrap(),
    );
    mkfs(dev.as_ref()).unwrap();
    QuicheFs::mount(dev).unwrap()
}

#[test]
fn default_policy_evicts_the_oldest_file() {
    let fs = fresh_fs(64);
    let old = fs.create_file(ROOT_INO, b"old").unwrap();
    let newer = fs.create_file(ROOT_INO, b"newer").unwrap();
    fs.set_times(old, 100, 100).unwrap();
    fs.set_times(newer, 100, 900).unwrap();

    let evicted = fs.reclaim_space(ROOT_INO).unwrap();
    assert_eq!(evicted, old);
    assert!(fs.lookup_child(ROOT_INO, b"newer").is_ok());
    assert!(matches!(
        fs.lookup_child(ROOT_INO, b"old"),
        Err(QfsError::NotFound(_))
    ));
}

#[test]
fn size_policy_evicts_the_largest_file() {
    let fs = fresh_fs(64);
    let small = fs.create_file(ROOT_INO, b"small").unwrap();
    let big = fs.create_file(ROOT_INO, b"big").unwrap();
    fs.append_data_block(big).unwrap();
    fs.append_data_block(big).unwrap();
    fs.append_data_block(small).unwrap();

    let previous = fs.install_policy(Arc::new(LargestSize));
    assert_eq!(previous.name(), "oldest_mtime");

    let evicted = fs.reclaim_space(ROOT_INO).unwrap();
    assert_eq!(evicted, big);

    // Restoring the returned policy brings back mtime ordering.
    let previous = fs.install_policy(previous);
    assert_eq!(previous.name(), "largest_size");
}

#[test]
fn reclaim_descends_into_subdirectories() {
    let fs = fresh_fs(64);
    let sub = fs.make_directory(ROOT_INO, b"sub").unwrap();
    let deep = fs.create_file(sub, b"deep").unwrap();
    let shallow = fs.create_file(ROOT_INO, b"shallow").unwrap();
    fs.set_times(deep, 10, 10).unwrap();
    fs.set_times(shallow, 10, 20).unwrap();

    let evicted = fs.reclaim_space(ROOT_INO).unwrap();
    assert_eq!(evicted, deep);
    // The now-empty subdirectory survives.
    assert!(fs.lookup_child(ROOT_INO, b"sub").is_ok());
    assert!(fs.read_dir(sub).unwrap().is_empty());
}

#[test]
fn open_files_are_never_victims() {
    let fs = fresh_fs(64);
    let pinned = fs.create_file(ROOT_INO, b"pinned").unwrap();
    let loose = fs.create_file(ROOT_INO, b"loose").unwrap();
    fs.set_times(pinned, 5, 5).unwrap();
    fs.set_times(loose, 5, 50).unwrap();

    // The oldest file is held open, so the younger one is taken.
    let handle = fs.open(pinned).unwrap();
    let evicted = fs.reclaim_space(ROOT_INO).unwrap();
    assert_eq!(evicted, loose);
    assert_eq!(handle.ino(), pinned);
    assert!(fs.lookup_child(ROOT_INO, b"pinned").is_ok());

    // With the handle dropped the old file becomes eligible again.
    drop(handle);
    let evicted = fs.reclaim_space(ROOT_INO).unwrap();
    assert_eq!(evicted, pinned);
}

#[test]
fn reclaim_with_no_eligible_file_reports_no_victim() {
    let fs = fresh_fs(64);
    assert!(matches!(
        fs.reclaim_space(ROOT_INO),
        Err(QfsError::NoVictim)
    ));

    // Directories alone do not help.
    fs.make_directory(ROOT_INO, b"only_dirs").unwrap();
    assert!(matches!(
        fs.reclaim_space(ROOT_INO),
        Err(QfsError::NoVictim)
    ));
}

#[test]
fn reclaim_root_must_be_a_directory() {
    let fs = fresh_fs(64);
    let file = fs.create_file(ROOT_INO, b"plain").unwrap();
    assert!(matches!(
        fs.reclaim_space(file),
        Err(QfsError::InvalidKind { .. })
    ));
}

#[test]
fn create_into_a_full_directory_evicts_first() {
    let fs = fresh_fs(256);
    for i in 0..MAX_SUBFILES {
        let ino = fs
            .create_file(ROOT_INO, format!("f{i:03}").as_bytes())
            .unwrap();
        // Give each file a distinct age, oldest first.
        fs.set_times(ino, i as u32, i as u32).unwrap();
    }
    assert_eq!(fs.read_dir(ROOT_INO).unwrap().len(), MAX_SUBFILES);

    let ino = fs.create_file(ROOT_INO, b"latecomer").unwrap();
    assert!(ino.0 > 0);

    // Still at capacity: the oldest entry made way for the new one.
    let listing = fs.read_dir(ROOT_INO).unwrap();
    assert_eq!(listing.len(), MAX_SUBFILES);
    assert!(listing.iter().all(|e| e.name != "f000"));
    assert!(listing.iter().any(|e| e.name == "latecomer"));
}

#[test]
fn full_directory_of_subdirectories_fails_with_no_victim() {
    let fs = fresh_fs(256);
    for i in 0..MAX_SUBFILES {
        fs.make_directory(ROOT_INO, format!("d{i:03}").as_bytes())
            .unwrap();
    }
    assert!(matches!(
        fs.create_file(ROOT_INO, b"overflow"),
        Err(QfsError::NoVictim)
    ));
    // The failed create left the table exactly at capacity.
    assert_eq!(fs.read_dir(ROOT_INO).unwrap().len(), MAX_SUBFILES);
}

#[test]
fn eviction_returns_every_block_of_the_victim() {
    let fs = fresh_fs(64);
    let fat = fs.create_file(ROOT_INO, b"fat").unwrap();
    fs.append_data_block(fat).unwrap();
    fs.append_data_block(fat).unwrap();
    fs.create_file(ROOT_INO, b"thin").unwrap();

    fs.install_policy(Arc::new(LargestSize));
    let free_before = fs.superblock().nr_free_blocks;
    let free_inodes_before = fs.superblock().nr_free_inodes;

    let evicted = fs.reclaim_space(ROOT_INO).unwrap();
    assert_eq!(evicted, fat);
    assert_eq!(fs.superblock().nr_free_blocks, free_before + 3);
    assert_eq!(fs.superblock().nr_free_inodes, free_inodes_before + 1);
}

#[test]
fn default_policy_is_mtime_after_mount() {
    let fs = fresh_fs(64);
    let previous = fs.install_policy(Arc::new(OldestMtime));
    assert_eq!(previous.name(), "oldest_mtime");
}

#[test]
fn reclaim_on_an_out_of_range_root_fails() {
    let fs = fresh_fs(64);
    assert!(matches!(
        fs.reclaim_space(InodeNumber(9999)),
        Err(QfsError::OutOfRange { .. })
    ));
}
