use std::path::Path;
use std::time::UNIX_EPOCH;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::media::mime_hint;
use crate::storage::error::StorageError;
use crate::storage::path::{canonicalize, child, join_base};
use crate::storage::{ByteStream, FileEntry};

// fsops
//
// the local, nfs, and smb backends all end up doing i/o against a directory
// tree visible to the kernel (a plain path or a mount point), so the actual
// operations live here and the clients differ only in how they establish
// and verify their base.

fn systime_secs(t: std::io::Result<std::time::SystemTime>) -> Option<i64> {
    t.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

#[cfg(unix)]
fn permissions_mask(meta: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;

    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permissions_mask(_meta: &std::fs::Metadata) -> Option<u32> {
    None
}

fn entry_from_metadata(name: String, vpath: String, meta: &std::fs::Metadata) -> FileEntry {
    let is_dir = meta.is_dir();

    FileEntry {
        mime_hint: if is_dir { None } else { mime_hint(&name) },
        size: if is_dir { 0 } else { meta.len() },
        modified: systime_secs(meta.modified()),
        created: systime_secs(meta.created()),
        permissions: permissions_mask(meta),
        name,
        path: vpath,
        is_dir,
    }
}

async fn metadata_for(
    real: &Path,
    follow_symlinks: bool,
) -> Result<std::fs::Metadata, StorageError> {
    let meta = if follow_symlinks {
        fs::metadata(real).await?
    } else {
        fs::symlink_metadata(real).await?
    };

    Ok(meta)
}

pub(crate) async fn list_dir(
    base: &Path,
    path: &str,
    follow_symlinks: bool,
) -> Result<Vec<FileEntry>, StorageError> {
    let vpath = canonicalize(path)?;
    let real = join_base(base, &vpath);

    let mut entries = Vec::new();
    let mut dir = fs::read_dir(&real).await?;

    while let Some(entry) = dir.next_entry().await? {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            // skip entries whose names are not valid utf-8 rather than
            // failing the whole listing
            Err(_) => continue,
        };

        let meta = match metadata_for(&entry.path(), follow_symlinks).await {
            Ok(meta) => meta,
            Err(_) => continue,
        };

        if !follow_symlinks && meta.is_symlink() {
            continue;
        }

        entries.push(entry_from_metadata(name.clone(), child(&vpath, &name), &meta));
    }

    Ok(entries)
}

pub(crate) async fn file_info(
    base: &Path,
    path: &str,
    follow_symlinks: bool,
) -> Result<FileEntry, StorageError> {
    let vpath = canonicalize(path)?;
    let real = join_base(base, &vpath);

    let meta = metadata_for(&real, follow_symlinks).await?;

    let name = crate::storage::path::file_name(&vpath).to_owned();

    Ok(entry_from_metadata(name, vpath, &meta))
}

pub(crate) async fn exists(base: &Path, path: &str) -> Result<bool, StorageError> {
    let real = join_base(base, &canonicalize(path)?);

    Ok(fs::try_exists(&real).await?)
}

pub(crate) async fn open_read(base: &Path, path: &str) -> Result<ByteStream, StorageError> {
    let real = join_base(base, &canonicalize(path)?);

    let file = fs::File::open(&real).await?;

    Ok(Box::new(file))
}

pub(crate) async fn read_partial(
    base: &Path,
    path: &str,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>, StorageError> {
    let real = join_base(base, &canonicalize(path)?);

    let mut file = fs::File::open(&real).await?;

    file.seek(SeekFrom::Start(offset)).await?;

    let mut buf = Vec::with_capacity(length.min(1 << 20) as usize);
    let mut handle = file.take(length);

    handle.read_to_end(&mut buf).await?;

    Ok(buf)
}

pub(crate) async fn write(
    base: &Path,
    path: &str,
    mut data: ByteStream,
) -> Result<(), StorageError> {
    let real = join_base(base, &canonicalize(path)?);

    if let Some(parent) = real.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::File::create(&real).await?;

    tokio::io::copy(&mut data, &mut file).await?;

    Ok(())
}

pub(crate) async fn copy(base: &Path, src: &str, dst: &str) -> Result<(), StorageError> {
    let real_src = join_base(base, &canonicalize(src)?);
    let real_dst = join_base(base, &canonicalize(dst)?);

    if let Some(parent) = real_dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::copy(&real_src, &real_dst).await?;

    Ok(())
}

pub(crate) async fn delete_file(base: &Path, path: &str) -> Result<(), StorageError> {
    let real = join_base(base, &canonicalize(path)?);

    fs::remove_file(&real).await?;

    Ok(())
}

pub(crate) async fn delete_dir(
    base: &Path,
    path: &str,
    recursive: bool,
) -> Result<(), StorageError> {
    let real = join_base(base, &canonicalize(path)?);

    if recursive {
        fs::remove_dir_all(&real).await?;
    } else {
        fs::remove_dir(&real).await?;
    }

    Ok(())
}

pub(crate) async fn mkdir(base: &Path, path: &str) -> Result<(), StorageError> {
    let real = join_base(base, &canonicalize(path)?);

    fs::create_dir_all(&real).await?;

    Ok(())
}
