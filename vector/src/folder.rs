//! Virtual folder hierarchy.
//!
//! Folders are purely metadata-derived: a vector belongs to the folder
//! named by its `folderPath` metadata entry, and the manifest keeps the
//! set of known paths. No blob exists per folder. The hierarchy is kept
//! closed: registering `/a/b/c` also registers `/a/b`, `/a`, and the
//! root, so every known path's ancestors are known too.
//!
//! Listing preserves the insertion order of first-seen paths. Counting
//! and search scope by exact path match, never recursively.

use std::collections::HashSet;
use std::sync::Arc;

use common::WriteCoordinator;

use crate::cache::CacheLayer;
use crate::chunk_store::{ChunkStore, Rewrite};
use crate::error::{Result, VectorDbError};
use crate::manifest_store::ManifestStore;
use crate::model::{
    DatabaseManifest, FOLDER_PATH_KEY, FolderEntry, ROOT_FOLDER, ScoredVector, SimilaritySearch,
    Vector,
};

/// Canonical form of a folder path: leading slash, no trailing slash
/// except for the root itself.
pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == ROOT_FOLDER {
        return ROOT_FOLDER.to_string();
    }
    let mut normalized = String::new();
    if !trimmed.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(trimmed.trim_end_matches('/'));
    normalized
}

/// All ancestors of a normalized path, root first, the path itself last.
pub(crate) fn ancestors(path: &str) -> Vec<String> {
    let mut chain = vec![ROOT_FOLDER.to_string()];
    if path == ROOT_FOLDER {
        return chain;
    }
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        chain.push(current.clone());
    }
    chain
}

/// Whether `candidate` is `folder` itself or lives somewhere under it.
fn within(candidate: &str, folder: &str) -> bool {
    if folder == ROOT_FOLDER {
        return true;
    }
    candidate == folder || candidate.starts_with(&format!("{}/", folder))
}

pub struct FolderIndex {
    manifests: Arc<ManifestStore>,
    chunks: Arc<ChunkStore>,
    cache: Arc<CacheLayer>,
    coordinator: Arc<WriteCoordinator>,
}

impl FolderIndex {
    pub fn new(
        manifests: Arc<ManifestStore>,
        chunks: Arc<ChunkStore>,
        cache: Arc<CacheLayer>,
        coordinator: Arc<WriteCoordinator>,
    ) -> Self {
        Self {
            manifests,
            chunks,
            cache,
            coordinator,
        }
    }

    async fn load_live(&self, database: &str) -> Result<DatabaseManifest> {
        self.manifests
            .load(database)
            .await?
            .filter(|m| !m.deleted)
            .ok_or_else(|| VectorDbError::DatabaseNotFound(database.to_string()))
    }

    /// Registers a path and its ancestors in first-seen insertion order.
    /// Returns whether the manifest changed.
    pub(crate) fn register_path(manifest: &mut DatabaseManifest, path: &str) -> bool {
        let mut changed = false;
        for ancestor in ancestors(path) {
            if !manifest.knows_folder(&ancestor) {
                manifest.folder_paths.push(ancestor);
                changed = true;
            }
        }
        changed
    }

    /// Creates a folder, materializing any missing ancestors. Idempotent:
    /// creating a known path is a no-op and no write is issued.
    pub async fn create_folder(&self, database: &str, path: &str) -> Result<()> {
        let path = normalize_path(path);
        self.coordinator
            .with_lock(database, || async {
                let mut manifest = self.load_live(database).await?;
                if Self::register_path(&mut manifest, &path) {
                    self.manifests.save_unlocked(manifest).await?;
                }
                Ok(())
            })
            .await
    }

    /// Known folder paths, in insertion order of first sighting.
    pub async fn list_folders(&self, database: &str) -> Result<Vec<String>> {
        Ok(self.load_live(database).await?.folder_paths)
    }

    /// Folder listing with exact (non-recursive) vector counts. Vectors
    /// without a folder tag count under the root.
    pub async fn folders_with_counts(&self, database: &str) -> Result<Vec<FolderEntry>> {
        let manifest = self.load_live(database).await?;
        let vectors = self.chunks.read_all(&manifest).await?;

        let mut entries: Vec<FolderEntry> = manifest
            .folder_paths
            .iter()
            .map(|path| FolderEntry {
                path: path.clone(),
                file_count: 0,
            })
            .collect();
        for vector in &vectors {
            let folder = vector.folder_path().unwrap_or(ROOT_FOLDER);
            if let Some(entry) = entries.iter_mut().find(|e| e.path == folder) {
                entry.file_count += 1;
            }
        }
        Ok(entries)
    }

    /// Renames a folder and its whole subtree, rewriting the tags of every
    /// vector inside. Returns the number of vectors retagged; renaming an
    /// empty folder returns 0 but still updates the known paths.
    pub async fn rename_folder(&self, database: &str, from: &str, to: &str) -> Result<u64> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        if from == ROOT_FOLDER {
            return Err(VectorDbError::InvalidFolderPath(
                "the root folder cannot be renamed".to_string(),
            ));
        }

        self.coordinator
            .with_lock(database, || async {
                let mut manifest = self.load_live(database).await?;

                let touched = self
                    .chunks
                    .rewrite_chunks(&mut manifest, |vector| {
                        match vector.folder_path() {
                            Some(folder) if within(folder, &from) => {
                                let mut updated = vector.clone();
                                let renamed =
                                    format!("{}{}", to, &folder[from.len()..]);
                                updated
                                    .metadata
                                    .insert(FOLDER_PATH_KEY.to_string(), renamed);
                                Rewrite::Update(updated)
                            }
                            _ => Rewrite::Keep,
                        }
                    })
                    .await?;

                // Rebuild the path list so renaming onto an existing folder
                // merges with it instead of listing it twice.
                let mut rebuilt: Vec<String> = Vec::with_capacity(manifest.folder_paths.len());
                let mut paths_changed = false;
                for path in manifest.folder_paths.drain(..) {
                    let target = if within(&path, &from) {
                        paths_changed = true;
                        format!("{}{}", to, &path[from.len()..])
                    } else {
                        path
                    };
                    if rebuilt.contains(&target) {
                        paths_changed = true;
                    } else {
                        rebuilt.push(target);
                    }
                }
                manifest.folder_paths = rebuilt;
                paths_changed |= Self::register_path(&mut manifest, &to);

                if touched > 0 || paths_changed {
                    self.manifests.save_unlocked(manifest).await?;
                    self.cache.evict_vectors(database).await;
                }
                Ok(touched)
            })
            .await
    }

    /// Deletes every vector at or under a path and prunes the subtree from
    /// the known paths. The root itself is never pruned. Returns the
    /// number of vectors deleted.
    pub async fn delete_folder(&self, database: &str, path: &str) -> Result<u64> {
        let path = normalize_path(path);

        self.coordinator
            .with_lock(database, || async {
                let mut manifest = self.load_live(database).await?;

                let deleted = self
                    .chunks
                    .rewrite_chunks(&mut manifest, |vector| match vector.folder_path() {
                        Some(folder) if within(folder, &path) => Rewrite::Remove,
                        _ => Rewrite::Keep,
                    })
                    .await?;

                let before = manifest.folder_paths.len();
                manifest
                    .folder_paths
                    .retain(|p| p == ROOT_FOLDER || !within(p, &path));
                let pruned = manifest.folder_paths.len() != before;

                if deleted > 0 || pruned {
                    self.manifests.save_unlocked(manifest).await?;
                    self.cache.evict_vectors(database).await;
                }
                Ok(deleted)
            })
            .await
    }

    /// Retags the given vectors into a target folder, creating it if
    /// needed. Unknown ids are skipped. Returns the number moved.
    pub async fn move_to_folder(
        &self,
        database: &str,
        ids: &[&str],
        target: &str,
    ) -> Result<u64> {
        let target = normalize_path(target);
        let wanted: HashSet<&str> = ids.iter().copied().collect();

        self.coordinator
            .with_lock(database, || async {
                let mut manifest = self.load_live(database).await?;
                let registered = Self::register_path(&mut manifest, &target);

                let moved = self
                    .chunks
                    .rewrite_chunks(&mut manifest, |vector| {
                        if wanted.contains(vector.id.as_str()) {
                            let mut updated = vector.clone();
                            updated
                                .metadata
                                .insert(FOLDER_PATH_KEY.to_string(), target.clone());
                            Rewrite::Update(updated)
                        } else {
                            Rewrite::Keep
                        }
                    })
                    .await?;

                if moved > 0 || registered {
                    self.manifests.save_unlocked(manifest).await?;
                    self.cache.evict_vectors(database).await;
                }
                Ok(moved)
            })
            .await
    }

    /// Moves the direct contents of one folder into another, creating the
    /// target if needed. Subfolders stay where they are. Returns the
    /// number moved.
    pub async fn move_folder_contents(
        &self,
        database: &str,
        from: &str,
        to: &str,
    ) -> Result<u64> {
        let from = normalize_path(from);
        let to = normalize_path(to);

        self.coordinator
            .with_lock(database, || async {
                let mut manifest = self.load_live(database).await?;
                let registered = Self::register_path(&mut manifest, &to);

                let moved = self
                    .chunks
                    .rewrite_chunks(&mut manifest, |vector| {
                        if vector.folder_path() == Some(from.as_str()) {
                            let mut updated = vector.clone();
                            updated
                                .metadata
                                .insert(FOLDER_PATH_KEY.to_string(), to.clone());
                            Rewrite::Update(updated)
                        } else {
                            Rewrite::Keep
                        }
                    })
                    .await?;

                if moved > 0 || registered {
                    self.manifests.save_unlocked(manifest).await?;
                    self.cache.evict_vectors(database).await;
                }
                Ok(moved)
            })
            .await
    }

    /// Similarity search scoped to the vectors tagged with exactly this
    /// folder path. Candidate filtering happens here; scoring and ordering
    /// are the ranker's.
    pub async fn search_in_folder(
        &self,
        database: &str,
        path: &str,
        query: &[f32],
        k: usize,
        threshold: f32,
        ranker: &dyn SimilaritySearch,
    ) -> Result<Vec<ScoredVector>> {
        let path = normalize_path(path);
        let manifest = self.load_live(database).await?;

        if let Some(expected) = manifest.dimensions {
            if query.len() != expected as usize {
                return Err(VectorDbError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let candidates: Vec<Vector> = self
            .chunks
            .read_all(&manifest)
            .await?
            .into_iter()
            .filter(|v| v.folder_path().unwrap_or(ROOT_FOLDER) == path)
            .collect();

        Ok(ranker.rank(&candidates, query, k, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_normalize_paths_to_canonical_form() {
        assert_eq!(normalize_path("/a/b/"), "/a/b");
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn should_list_ancestors_root_first() {
        assert_eq!(
            ancestors("/a/b/c"),
            vec!["/".to_string(), "/a".to_string(), "/a/b".to_string(), "/a/b/c".to_string()]
        );
        assert_eq!(ancestors("/"), vec!["/".to_string()]);
    }

    #[test]
    fn should_register_missing_ancestors_in_order() {
        // given
        let mut manifest = DatabaseManifest::new("docs", "0xAA", None);

        // when
        let changed = FolderIndex::register_path(&mut manifest, "/a/b/c");

        // then
        assert!(changed);
        assert_eq!(
            manifest.folder_paths,
            vec!["/", "/a", "/a/b", "/a/b/c"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );

        // and registering again is a no-op
        assert!(!FolderIndex::register_path(&mut manifest, "/a/b/c"));
    }

    #[test]
    fn should_scope_subtree_membership_exactly() {
        assert!(within("/a/b", "/a"));
        assert!(within("/a", "/a"));
        assert!(!within("/ab", "/a"));
        assert!(within("/anything", "/"));
    }
}
