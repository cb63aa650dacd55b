//! Workspace transport: pack a directory into a gzipped tar archive and
//! unpack it again on the other side.
//!
//! Archives arrive from the network, so extraction is defensive in one
//! specific way: the whole archive is validated before a single byte is
//! written. An entry whose path would resolve outside the destination,
//! or whose type is anything but a regular file, directory, or symlink,
//! rejects the archive wholesale.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use girder_core::{Error, Result};
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

/// Pack `dir` into a gzipped tar archive at `archive`.
pub async fn pack(dir: &Path, archive: &Path) -> Result<()> {
    let dir = dir.to_owned();
    let archive = archive.to_owned();
    run_blocking(move || pack_sync(&dir, &archive)).await
}

/// Unpack the archive at `archive` into `dest`, which must already
/// exist and be empty or freshly created.
pub async fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_owned();
    let dest = dest.to_owned();
    run_blocking(move || unpack_sync(&archive, &dest)).await
}

async fn run_blocking<F>(op: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| Error::TransientIo(format!("archive task failed: {err}")))?
}

fn pack_sync(dir: &Path, archive: &Path) -> Result<()> {
    let file = File::create(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", dir)?;
    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

fn unpack_sync(archive: &Path, dest: &Path) -> Result<()> {
    // Validation pass over the whole archive before anything touches
    // the destination.
    let mut inspect = Archive::new(GzDecoder::new(File::open(archive)?));
    for entry in inspect.entries()? {
        let entry = entry?;
        let kind = entry.header().entry_type();
        if !matches!(
            kind,
            EntryType::Regular | EntryType::Directory | EntryType::Symlink
        ) {
            return Err(Error::InvalidInput(format!(
                "archive entry {:?} has forbidden type {kind:?}",
                entry.path()
            )));
        }
        let path = entry.path()?;
        check_entry_path(&path)?;
    }

    let mut extract = Archive::new(GzDecoder::new(File::open(archive)?));
    for entry in extract.entries()? {
        let mut entry = entry?;
        // unpack_in re-checks containment at write time.
        if !entry.unpack_in(dest)? {
            return Err(Error::InvalidInput(format!(
                "archive entry {:?} escaped the destination",
                entry.path()
            )));
        }
    }
    Ok(())
}

/// Reject absolute paths and any path that steps upward. Symlink
/// targets are left to `unpack_in`, which refuses links crossing the
/// destination boundary.
fn check_entry_path(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidInput(format!(
                    "archive entry {path:?} escapes the workspace"
                )));
            }
        }
    }
    Ok(())
}

/// A scratch directory holding an unpacked workspace plus the archive
/// file it travels as.
pub struct LocalWorkspace {
    root: tempfile::TempDir,
}

impl LocalWorkspace {
    pub fn create() -> Result<Self> {
        let root = tempfile::tempdir()?;
        std::fs::create_dir(root.path().join("tree"))?;
        Ok(Self { root })
    }

    /// The unpacked workspace directory.
    pub fn tree(&self) -> PathBuf {
        self.root.path().join("tree")
    }

    /// Where the packed archive lives during transfer.
    pub fn archive(&self) -> PathBuf {
        self.root.path().join("workspace.tar.gz")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_tree(root: &Path) {
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::write(root.join("src/main.c"), b"int main(void) { return 0; }").unwrap();
        std::fs::write(root.join("src/nested/data.bin"), vec![0u8; 1024]).unwrap();
        std::fs::write(root.join("README"), b"hello").unwrap();
    }

    #[tokio::test]
    async fn pack_then_unpack_preserves_the_tree() {
        let source = tempfile::tempdir().unwrap();
        sample_tree(source.path());
        let scratch = tempfile::tempdir().unwrap();
        let archive = scratch.path().join("ws.tar.gz");

        pack(source.path(), &archive).await.unwrap();

        let dest = tempfile::tempdir().unwrap();
        unpack(&archive, dest.path()).await.unwrap();

        assert_eq!(
            std::fs::read(dest.path().join("src/main.c")).unwrap(),
            b"int main(void) { return 0; }"
        );
        assert_eq!(
            std::fs::read(dest.path().join("src/nested/data.bin"))
                .unwrap()
                .len(),
            1024
        );
        assert_eq!(std::fs::read(dest.path().join("README")).unwrap(), b"hello");
    }

    fn write_archive_with_entry(path: &Path, entry_name: &str, entry_type: EntryType) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "innocent.txt", &b"ok\n\n"[..])
            .unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(entry_type);
        let payload: &[u8] = if entry_type == EntryType::Regular {
            header.set_size(6);
            b"pwned\n"
        } else {
            header.set_size(0);
            b""
        };
        header.set_mode(0o644);
        // Write the name bytes directly: Header::set_path refuses `..`
        // components, but building such an archive is the whole point.
        header.as_gnu_mut().unwrap().name[..entry_name.len()]
            .copy_from_slice(entry_name.as_bytes());
        header.set_cksum();
        builder.append(&header, payload).unwrap();

        builder.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn traversal_entry_rejects_the_whole_archive() {
        let scratch = tempfile::tempdir().unwrap();
        let archive = scratch.path().join("evil.tar.gz");
        write_archive_with_entry(&archive, "../../etc/passwd", EntryType::Regular);

        let dest = tempfile::tempdir().unwrap();
        let err = unpack(&archive, dest.path()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // Wholesale rejection: not even the innocent entry landed.
        assert!(std::fs::read_dir(dest.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn device_entry_rejects_the_whole_archive() {
        let scratch = tempfile::tempdir().unwrap();
        let archive = scratch.path().join("device.tar.gz");
        write_archive_with_entry(&archive, "dev-null", EntryType::Char);

        let dest = tempfile::tempdir().unwrap();
        let err = unpack(&archive, dest.path()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(std::fs::read_dir(dest.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn empty_workspace_round_trips() {
        let source = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let archive = scratch.path().join("empty.tar.gz");
        pack(source.path(), &archive).await.unwrap();

        let dest = tempfile::tempdir().unwrap();
        unpack(&archive, dest.path()).await.unwrap();
        assert!(std::fs::read_dir(dest.path()).unwrap().next().is_none());
    }

    #[test]
    fn entry_path_checks() {
        assert!(check_entry_path(Path::new("a/b/c")).is_ok());
        assert!(check_entry_path(Path::new("./a")).is_ok());
        assert!(check_entry_path(Path::new("a/../b")).is_err());
        assert!(check_entry_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn local_workspace_layout() {
        let ws = LocalWorkspace::create().unwrap();
        assert!(ws.tree().is_dir());
        assert!(!ws.archive().exists());
        let mut f = std::fs::File::create(ws.tree().join("file")).unwrap();
        f.write_all(b"x").unwrap();
    }
}
