//! Local filesystem store.

use super::{content_hash, PathStream, StoreAdapter, StoreMeta, StoreStat};
use crate::error::{StoreError, StoreResult};
use crate::path::{StorePath, RESERVED_PREFIX};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// A volume rooted at a local directory.
///
/// Writes go to a reserved temporary sibling and are renamed into place.
/// Deleting the last file of a directory removes the emptied directories
/// up to the root.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root)
            .await
            .map_err(|e| StoreError::from_io(root.display().to_string(), e))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn prune_empty_parents(&self, mut dir: Option<&Path>) {
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[async_trait]
impl StoreAdapter for LocalStore {
    async fn get(&self, path: &StorePath) -> StoreResult<Bytes> {
        let data = fs::read(path.to_fs_path(&self.root))
            .await
            .map_err(|e| StoreError::from_io(path.as_str(), e))?;
        Ok(Bytes::from(data))
    }

    async fn put(&self, path: &StorePath, data: Bytes) -> StoreResult<()> {
        let target = path.to_fs_path(&self.root);
        let io_err = |e| StoreError::from_io(path.as_str(), e);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let temp = target.with_file_name(format!(
            "{RESERVED_PREFIX}-tmp-{:016x}",
            rand::random::<u64>()
        ));
        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(io_err(err));
        }
        Ok(())
    }

    async fn delete(&self, path: &StorePath) -> StoreResult<()> {
        let target = path.to_fs_path(&self.root);
        fs::remove_file(&target)
            .await
            .map_err(|e| StoreError::from_io(path.as_str(), e))?;
        self.prune_empty_parents(target.parent()).await;
        Ok(())
    }

    fn list(&self, prefix: &str) -> PathStream<'_> {
        let walk = Walk {
            root: self.root.clone(),
            prefix: prefix.trim_start_matches('/').to_string(),
            dirs: vec![self.root.clone()],
            ready: VecDeque::new(),
        };

        stream::unfold(walk, |mut walk| async move {
            loop {
                if let Some(path) = walk.ready.pop_front() {
                    return Some((Ok(path), walk));
                }
                let dir = walk.dirs.pop()?;
                if let Err(err) = walk.read_dir(&dir).await {
                    return Some((Err(err), walk));
                }
            }
        })
        .boxed()
    }

    async fn stat(&self, path: &StorePath) -> StoreResult<StoreStat> {
        let target = path.to_fs_path(&self.root);
        let io_err = |e| StoreError::from_io(path.as_str(), e);

        let metadata = fs::metadata(&target).await.map_err(io_err)?;
        if !metadata.is_file() {
            return Err(StoreError::NotFound {
                path: path.to_string(),
            });
        }
        let data = fs::read(&target).await.map_err(io_err)?;

        Ok(StoreStat {
            size: data.len() as u64,
            modified: metadata.modified().map_err(io_err)?,
            content_hash: content_hash(&data),
        })
    }

    async fn metadata(&self, path: &StorePath) -> StoreResult<StoreMeta> {
        let target = path.to_fs_path(&self.root);
        let io_err = |e| StoreError::from_io(path.as_str(), e);

        let metadata = fs::metadata(&target).await.map_err(io_err)?;
        if !metadata.is_file() {
            return Err(StoreError::NotFound {
                path: path.to_string(),
            });
        }
        Ok(StoreMeta {
            size: metadata.len(),
            modified: metadata.modified().map_err(io_err)?,
        })
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

/// Depth-first directory walk that reads one directory per step.
struct Walk {
    root: PathBuf,
    prefix: String,
    dirs: Vec<PathBuf>,
    ready: VecDeque<StorePath>,
}

impl Walk {
    async fn read_dir(&mut self, dir: &Path) -> StoreResult<()> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            // Removed between listing its parent and reading it.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::from_io(dir.display().to_string(), e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                debug!(path = %entry.path().display(), "skipping non UTF-8 name");
                continue;
            };
            if name.starts_with(RESERVED_PREFIX) {
                continue;
            }

            let Some(relative) = self.relative(&entry.path()) else {
                continue;
            };
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                let as_dir = format!("{relative}/");
                if as_dir.starts_with(&self.prefix) || self.prefix.starts_with(&as_dir) {
                    self.dirs.push(entry.path());
                }
            } else if file_type.is_file() {
                match StorePath::parse(&relative) {
                    Ok(path) if path.starts_with(&self.prefix) => files.push(path),
                    Ok(_) => {}
                    Err(err) => debug!(%err, "skipping unrepresentable path"),
                }
            }
        }

        files.sort();
        self.ready.extend(files);
        Ok(())
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        Some(parts?.join("/"))
    }
}
