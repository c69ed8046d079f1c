// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! LOCAL INFILE uploads.
//!
//! The server names a file; the driver streams its contents only when the
//! path resolves to a descendant of the configured root directory. A denied
//! request is answered with a single empty data envelope so the exchange
//!  completes, and a permission error is surfaced at the statement result.

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use std::path::{Component, Path, PathBuf};

use crate::error::{DriverError, Error, Result};

/// Lexically normalizes a path: resolves `.` and `..` without touching the
/// filesystem. A `..` that would escape the path root makes the path
/// unacceptable.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => (),
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

/// Whether `requested` stays under `root` after lexical normalization.
pub(crate) fn is_path_allowed(root: &Path, requested: &Path) -> bool {
    let root = match normalize(root) {
        Some(root) => root,
        None => return false,
    };
    match normalize(requested) {
        Some(requested) => requested.starts_with(&root),
        None => false,
    }
}

/// A file opened for a LOCAL INFILE response, read in buffer-size chunks.
#[derive(Debug)]
pub(crate) struct LocalInfile {
    file: File,
    buffer: Vec<u8>,
}

impl LocalInfile {
    /// Opens the requested file if the configured root allows it.
    pub(crate) async fn open(
        root: Option<&Path>,
        requested: &str,
        buffer_size: usize,
    ) -> Result<LocalInfile> {
        let root = root.ok_or(DriverError::LocalInfileDisabled)?;
        let requested_path = Path::new(requested);

        if !is_path_allowed(root, requested_path) {
            return Err(Error::Driver(DriverError::LocalInfileDenied {
                path: requested.into(),
            }));
        }

        // Symlinks could still escape the root, so the real path is checked
        // as well.
        let canonical_root = tokio::fs::canonicalize(root).await?;
        let canonical = tokio::fs::canonicalize(requested_path)
            .await
            .map_err(|_| DriverError::LocalInfileDenied {
                path: requested.into(),
            })?;
        if !canonical.starts_with(&canonical_root) {
            return Err(Error::Driver(DriverError::LocalInfileDenied {
                path: requested.into(),
            }));
        }

        let file = File::open(&canonical).await?;
        Ok(LocalInfile {
            file,
            buffer: vec![0; buffer_size.max(1)],
        })
    }

    /// Reads the next chunk; `None` on end of file.
    pub(crate) async fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
        let read = self.file.read(&mut self.buffer).await?;
        if read == 0 {
            Ok(None)
        } else {
            Ok(Some(&self.buffer[..read]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_outside_of_the_root_are_denied() {
        let root = Path::new("/data/imports");
        assert!(is_path_allowed(root, Path::new("/data/imports/batch.csv")));
        assert!(is_path_allowed(root, Path::new("/data/imports/sub/batch.csv")));
        assert!(!is_path_allowed(root, Path::new("/etc/passwd")));
        assert!(!is_path_allowed(root, Path::new("/data/imports/../secrets")));
        assert!(!is_path_allowed(root, Path::new("/data/imports2/batch.csv")));
        assert!(is_path_allowed(root, Path::new("/data/imports/./batch.csv")));
    }

    #[tokio::test]
    async fn denied_paths_should_not_touch_the_filesystem() {
        let err = LocalInfile::open(
            Some(Path::new("/data/imports")),
            "/etc/passwd",
            1024,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Driver(DriverError::LocalInfileDenied { .. })
        ));
    }

    #[tokio::test]
    async fn uploads_are_disabled_without_a_root() {
        let err = LocalInfile::open(None, "/anything", 1024).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Driver(DriverError::LocalInfileDisabled)
        ));
    }

    #[tokio::test]
    async fn should_stream_chunks_from_an_allowed_file() {
        let dir = std::env::temp_dir().join("mysql_reactor_infile_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("data.csv");
        std::fs::write(&path, b"AAAA\nBBBB\n").unwrap();

        let mut infile = LocalInfile::open(
            Some(dir.as_path()),
            path.to_str().unwrap(),
            4,
        )
        .await
        .unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = infile.next_chunk().await.unwrap() {
            assert!(chunk.len() <= 4);
            collected.extend_from_slice(chunk);
        }
        assert_eq!(collected, b"AAAA\nBBBB\n");

        let _ = std::fs::remove_file(&path);
    }
}
