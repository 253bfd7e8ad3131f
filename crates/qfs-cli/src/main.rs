#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use qfs_block::{BlockDevice, ByteBlockDevice, FileByteDevice};
use qfs_core::{mkfs, policy_by_name, QuicheFs, RenameFlags};
use qfs_types::{InodeNumber, BLOCK_SIZE, ROOT_INO};
use serde::Serialize;
use std::env;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct InspectOutput {
    nr_blocks: u32,
    nr_inodes: u32,
    nr_istore_blocks: u32,
    nr_ifree_blocks: u32,
    nr_bfree_blocks: u32,
    nr_free_inodes: u32,
    nr_free_blocks: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "mkfs" => {
            let Some(image) = args.next() else {
                bail!("mkfs requires <image-path> <blocks>");
            };
            let Some(blocks) = args.next() else {
                bail!("mkfs requires <image-path> <blocks>");
            };
            let blocks: u32 = blocks
                .parse()
                .with_context(|| format!("invalid block count: {blocks}"))?;
            mkfs_cmd(Path::new(&image), blocks)
        }
        "inspect" => {
            let Some(image) = args.next() else {
                bail!("inspect requires an image path");
            };
            let json = args.any(|arg| arg == "--json");
            inspect_cmd(Path::new(&image), json)
        }
        "ls" => {
            let Some(image) = args.next() else {
                bail!("ls requires <image-path> [path]");
            };
            let path = args.next().unwrap_or_else(|| "/".to_owned());
            ls_cmd(Path::new(&image), &path)
        }
        "stat" => {
            let Some(image) = args.next() else {
                bail!("stat requires <image-path> <path>");
            };
            let Some(path) = args.next() else {
                bail!("stat requires <image-path> <path>");
            };
            let json = args.any(|arg| arg == "--json");
            stat_cmd(Path::new(&image), &path, json)
        }
        "touch" => with_parent(args, "touch", |fs, dir, name| {
            fs.create_file(dir, name)?;
            Ok(())
        }),
        "mkdir" => with_parent(args, "mkdir", |fs, dir, name| {
            fs.make_directory(dir, name)?;
            Ok(())
        }),
        "rm" => with_parent(args, "rm", |fs, dir, name| {
            fs.remove_entry(dir, name)?;
            Ok(())
        }),
        "rmdir" => with_parent(args, "rmdir", |fs, dir, name| {
            fs.remove_directory(dir, name)?;
            Ok(())
        }),
        "mv" => {
            let Some(image) = args.next() else {
                bail!("mv requires <image-path> <from> <to>");
            };
            let Some(from) = args.next() else {
                bail!("mv requires <image-path> <from> <to>");
            };
            let Some(to) = args.next() else {
                bail!("mv requires <image-path> <from> <to>");
            };
            mv_cmd(Path::new(&image), &from, &to)
        }
        "reclaim" => {
            let Some(image) = args.next() else {
                bail!("reclaim requires <image-path> [--policy <name>]");
            };
            let mut policy = None;
            let remaining: Vec<String> = args.collect();
            let mut iter = remaining.iter();
            while let Some(arg) = iter.next() {
                if arg == "--policy" {
                    policy = iter.next().cloned();
                }
            }
            reclaim_cmd(Path::new(&image), policy.as_deref())
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("quichefs\n");
    println!("USAGE:");
    println!("  quichefs mkfs <image-path> <blocks>");
    println!("  quichefs inspect <image-path> [--json]");
    println!("  quichefs ls <image-path> [path]");
    println!("  quichefs stat <image-path> <path> [--json]");
    println!("  quichefs touch <image-path> <path>");
    println!("  quichefs mkdir <image-path> <path>");
    println!("  quichefs rm <image-path> <path>");
    println!("  quichefs rmdir <image-path> <path>");
    println!("  quichefs mv <image-path> <from> <to>");
    println!("  quichefs reclaim <image-path> [--policy <name>]");
}

fn open_device(image: &Path) -> Result<Arc<dyn BlockDevice>> {
    let file = FileByteDevice::open(image)
        .with_context(|| format!("failed to open {}", image.display()))?;
    let dev = ByteBlockDevice::new(file, BLOCK_SIZE as u32)
        .with_context(|| format!("{} is not a block-aligned image", image.display()))?;
    Ok(Arc::new(dev))
}

fn mount(image: &Path) -> Result<QuicheFs> {
    let dev = open_device(image)?;
    QuicheFs::mount(dev).with_context(|| format!("failed to mount {}", image.display()))
}

fn mkfs_cmd(image: &Path, blocks: u32) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image)
        .with_context(|| format!("failed to create {}", image.display()))?;
    file.set_len(u64::from(blocks) * BLOCK_SIZE as u64)
        .context("failed to size the image")?;
    drop(file);

    let dev = open_device(image)?;
    let sb = mkfs(dev.as_ref()).context("format failed")?;
    println!(
        "formatted {}: {} blocks, {} inodes, {} free data blocks",
        image.display(),
        sb.nr_blocks,
        sb.nr_inodes,
        sb.nr_free_blocks
    );
    Ok(())
}

fn inspect_cmd(image: &Path, json: bool) -> Result<()> {
    let fs = mount(image)?;
    let sb = fs.superblock();
    let output = InspectOutput {
        nr_blocks: sb.nr_blocks,
        nr_inodes: sb.nr_inodes,
        nr_istore_blocks: sb.nr_istore_blocks,
        nr_ifree_blocks: sb.nr_ifree_blocks,
        nr_bfree_blocks: sb.nr_bfree_blocks,
        nr_free_inodes: sb.nr_free_inodes,
        nr_free_blocks: sb.nr_free_blocks,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("QuicheFS image {}", image.display());
        println!("nr_blocks: {}", output.nr_blocks);
        println!("nr_inodes: {}", output.nr_inodes);
        println!("nr_istore_blocks: {}", output.nr_istore_blocks);
        println!("nr_ifree_blocks: {}", output.nr_ifree_blocks);
        println!("nr_bfree_blocks: {}", output.nr_bfree_blocks);
        println!("nr_free_inodes: {}", output.nr_free_inodes);
        println!("nr_free_blocks: {}", output.nr_free_blocks);
    }
    Ok(())
}

fn ls_cmd(image: &Path, path: &str) -> Result<()> {
    let fs = mount(image)?;
    let dir = resolve(&fs, path)?;
    for entry in fs.read_dir(dir)? {
        println!("{:>6}  {}", entry.ino, entry.name);
    }
    Ok(())
}

fn stat_cmd(image: &Path, path: &str, json: bool) -> Result<()> {
    let fs = mount(image)?;
    let ino = resolve(&fs, path)?;
    let st = fs.stat(ino)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&st).context("serialize output")?
        );
    } else {
        println!("ino: {}", st.ino);
        println!("kind: {:?}", st.kind);
        println!("mode: {:o}", st.mode);
        println!("size: {}", st.size);
        println!("blocks: {}", st.blocks);
        println!("nlink: {}", st.nlink);
        println!("atime: {}", st.atime);
        println!("mtime: {}", st.mtime);
        println!("ctime: {}", st.ctime);
    }
    Ok(())
}

fn mv_cmd(image: &Path, from: &str, to: &str) -> Result<()> {
    let fs = mount(image)?;
    let (from_dir, from_name) = resolve_parent(&fs, from)?;
    let (to_dir, to_name) = resolve_parent(&fs, to)?;
    fs.rename_entry(
        from_dir,
        from_name.as_bytes(),
        to_dir,
        to_name.as_bytes(),
        RenameFlags::default(),
    )?;
    fs.sync()?;
    Ok(())
}

fn reclaim_cmd(image: &Path, policy: Option<&str>) -> Result<()> {
    let fs = mount(image)?;
    if let Some(name) = policy {
        let policy = policy_by_name(name)
            .with_context(|| format!("unknown policy: {name} (try oldest_mtime or largest_size)"))?;
        fs.install_policy(policy);
    }
    let evicted = fs.reclaim_space(ROOT_INO).context("reclaim failed")?;
    fs.sync()?;
    println!("evicted inode {evicted}");
    Ok(())
}

/// Run a parent-directory operation: `<image> <path>` resolved to the
/// containing directory plus the final component.
fn with_parent<F>(mut args: impl Iterator<Item = String>, verb: &str, op: F) -> Result<()>
where
    F: FnOnce(&QuicheFs, InodeNumber, &[u8]) -> qfs_error::Result<()>,
{
    let Some(image) = args.next() else {
        bail!("{verb} requires <image-path> <path>");
    };
    let Some(path) = args.next() else {
        bail!("{verb} requires <image-path> <path>");
    };
    let fs = mount(Path::new(&image))?;
    let (dir, name) = resolve_parent(&fs, &path)?;
    op(&fs, dir, name.as_bytes()).with_context(|| format!("{verb} {path}"))?;
    fs.sync()?;
    Ok(())
}

/// Walk an absolute path down from the root directory.
fn resolve(fs: &QuicheFs, path: &str) -> Result<InodeNumber> {
    let mut ino = ROOT_INO;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        ino = fs
            .lookup_child(ino, component.as_bytes())
            .with_context(|| format!("no such entry: {component}"))?;
    }
    Ok(ino)
}

/// Split a path into its parent directory's inode and final component.
fn resolve_parent(fs: &QuicheFs, path: &str) -> Result<(InodeNumber, String)> {
    let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let Some(name) = components.pop() else {
        bail!("path has no final component: {path}");
    };
    let mut ino = ROOT_INO;
    for component in components {
        ino = fs
            .lookup_child(ino, component.as_bytes())
            .with_context(|| format!("no such directory: {component}"))?;
    }
    Ok((ino, name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfs_block::MemoryByteDevice;

    fn scratch_fs() -> QuicheFs {
        let dev: Arc<dyn BlockDevice> = Arc::new(
            ByteBlockDevice::new(
                MemoryByteDevice::new(64 * BLOCK_SIZE),
                BLOCK_SIZE as u32,
            )
            .unwrap(),
        );
        mkfs(dev.as_ref()).unwrap();
        QuicheFs::mount(dev).unwrap()
    }

    #[test]
    fn resolve_walks_nested_paths() {
        let fs = scratch_fs();
        let sub = fs.make_directory(ROOT_INO, b"sub").unwrap();
        let file = fs.create_file(sub, b"file").unwrap();

        assert_eq!(resolve(&fs, "/").unwrap(), ROOT_INO);
        assert_eq!(resolve(&fs, "/sub").unwrap(), sub);
        assert_eq!(resolve(&fs, "/sub/file").unwrap(), file);
        assert_eq!(resolve(&fs, "sub//file").unwrap(), file);
        assert!(resolve(&fs, "/sub/missing").is_err());
    }

    #[test]
    fn resolve_parent_splits_the_last_component() {
        let fs = scratch_fs();
        let sub = fs.make_directory(ROOT_INO, b"sub").unwrap();

        let (dir, name) = resolve_parent(&fs, "/sub/new").unwrap();
        assert_eq!(dir, sub);
        assert_eq!(name, "new");

        let (dir, name) = resolve_parent(&fs, "top").unwrap();
        assert_eq!(dir, ROOT_INO);
        assert_eq!(name, "top");

        assert!(resolve_parent(&fs, "/").is_err());
    }

    #[test]
    fn end_to_end_on_a_file_image() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        mkfs_cmd(tmp.path(), 64).unwrap();

        let fs = mount(tmp.path()).unwrap();
        fs.create_file(ROOT_INO, b"hello").unwrap();
        fs.sync().unwrap();
        drop(fs);

        let fs = mount(tmp.path()).unwrap();
        assert!(fs.lookup_child(ROOT_INO, b"hello").is_ok());
    }
}
