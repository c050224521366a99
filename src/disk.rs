// SPDX-License-Identifier: Apache-2.0

//! Disk registration (spec §4.G.8): the root disk plus an optional
//! comma-separated secondary-disk list, each opened, switched to
//! non-blocking, and probed for the ext4 magic to decide whether the
//! in-enclave side should treat it as encrypted.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::IntoRawFd;

use anyhow::{bail, Context, Result};

use crate::config::record::{DiskConfig, DISK_MNT_MAX_PATH_LEN};

/// One first empty block for bootloaders, and offset of the `s_magic`
/// field in the second block (spec §3/§8).
const EXT4_MAGIC_OFFSET: u64 = 1024 + 0x38;

/// Returns whether the disk image at `path` should be treated as
/// encrypted: `false` iff the two bytes at `EXT4_MAGIC_OFFSET` equal the
/// ext4 magic `{0x53, 0xEF}` (spec §8). A short read is logged and treated
/// the same as an unrecognized magic — it cannot be distinguished from
/// corruption (spec §9 Open Question 3).
pub fn is_encrypted(file: &mut File) -> bool {
    let mut magic = [0u8; 2];
    match file
        .seek(SeekFrom::Start(EXT4_MAGIC_OFFSET))
        .and_then(|_| file.read_exact(&mut magic))
    {
        Ok(()) => magic != [0x53, 0xEF],
        Err(e) => {
            log::warn!("[ Launcher ] pread(disk, 2, EXT4_MAGIC_OFFSET): {}", e);
            false
        }
    }
}

fn open_disk(path: &str, read_only: bool) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(!read_only)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .with_context(|| {
            format!(
                "unable to open disk file {} for {} access",
                path,
                if read_only { "read" } else { "read/write" }
            )
        })?;
    Ok(file)
}

/// Registers a single disk, appending it to `disks`. `idx` is only used to
/// produce a useful diagnostic for mount-path overflow.
pub fn register_hd(disks: &mut Vec<DiskConfig>, path: &str, mount: &str, read_only: bool) -> Result<()> {
    if mount.len() > DISK_MNT_MAX_PATH_LEN {
        bail!(
            "mount path for disk {} too long (maximum length is {}): {:?}",
            disks.len(),
            DISK_MNT_MAX_PATH_LEN,
            mount
        );
    }
    if path.is_empty() {
        return Ok(());
    }

    let mut file = open_disk(path, read_only)?;
    let encrypted = is_encrypted(&mut file);

    disks.push(DiskConfig {
        fd: file.into_raw_fd(),
        mount_path: mount.to_string(),
        read_only,
        encrypted,
    });
    Ok(())
}

/// Parses `SGXLKL_HDS`-style config: `disk1path:disk1mnt:disk1ro,...`.
fn parse_secondary(hds: &str) -> Vec<(String, String, bool)> {
    let mut out = Vec::new();
    for entry in hds.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(3, ':');
        let path = parts.next().unwrap_or("");
        let mount = parts.next().unwrap_or("");
        let ro = parts.next().map(|s| s == "1").unwrap_or(false);
        out.push((path.to_string(), mount.to_string(), ro));
    }
    out
}

/// Registers the root disk plus the secondary disks described by `hds`
/// (spec §4.G.8).
pub fn register_hds(root_path: &str, root_ro: bool, hds: &str) -> Result<Vec<DiskConfig>> {
    let mut disks = Vec::with_capacity(1 + hds.matches(',').count());
    register_hd(&mut disks, root_path, "/", root_ro)?;
    for (path, mount, ro) in parse_secondary(hds) {
        register_hd(&mut disks, &path, &mount, ro)?;
    }
    Ok(disks)
}

pub fn set_nonblocking(fd: i32) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 {
            bail!(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            bail!(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn make_ext4_like(dir: &tempdir::TempDir, magic: [u8; 2]) -> std::path::PathBuf {
        let path = dir.path().join("disk.img");
        let mut f = File::create(&path).unwrap();
        let mut buf = vec![0u8; 1024 + 0x38 + 2];
        buf[1024 + 0x38] = magic[0];
        buf[1024 + 0x38 + 1] = magic[1];
        f.write_all(&buf).unwrap();
        path
    }

    #[test]
    fn ext4_magic_is_unencrypted() {
        let dir = tempdir::TempDir::new("disk").unwrap();
        let path = make_ext4_like(&dir, [0x53, 0xEF]);
        let mut f = File::open(&path).unwrap();
        assert!(!is_encrypted(&mut f));
    }

    #[test]
    fn other_magic_is_encrypted() {
        let dir = tempdir::TempDir::new("disk").unwrap();
        let path = make_ext4_like(&dir, [0x00, 0x00]);
        let mut f = File::open(&path).unwrap();
        assert!(is_encrypted(&mut f));
    }

    #[test]
    fn short_read_is_treated_as_unencrypted() {
        let dir = tempdir::TempDir::new("disk").unwrap();
        let path = dir.path().join("tiny.img");
        File::create(&path).unwrap().write_all(b"hi").unwrap();
        let mut f = File::open(&path).unwrap();
        assert!(!is_encrypted(&mut f));
    }

    #[test]
    fn overlong_mount_path_is_fatal() {
        let mut disks = Vec::new();
        let long = "x".repeat(DISK_MNT_MAX_PATH_LEN + 1);
        assert!(register_hd(&mut disks, "", &long, true).is_err());
    }

    #[test]
    fn secondary_list_parses() {
        let got = parse_secondary("a:/mnt/a:1,b:/mnt/b:0");
        assert_eq!(
            got,
            vec![
                ("a".into(), "/mnt/a".into(), true),
                ("b".into(), "/mnt/b".into(), false),
            ]
        );
    }
}
