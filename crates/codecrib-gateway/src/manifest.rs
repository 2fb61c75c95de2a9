use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info, warn};

use codecrib_db::Database;
use codecrib_types::CoreError;
use codecrib_types::events::RoomEvent;
use codecrib_types::models::FileRecord;

use crate::blob::BlobStore;
use crate::blocking;
use crate::router::RoomRouter;

/// Inputs of a file attach. Either `content` or `name` must be present.
#[derive(Debug, Default, Clone)]
pub struct AttachRequest {
    pub content: Option<Bytes>,
    pub name: Option<String>,
    pub ext: Option<String>,
    /// Only used when no bytes are uploaded.
    pub lines: Option<u64>,
}

/// Drives a file through blob storage, the room manifest, and the room's
/// live connections.
#[derive(Clone)]
pub struct FileManifest {
    db: Arc<Database>,
    blobs: Arc<BlobStore>,
    router: RoomRouter,
}

impl FileManifest {
    pub fn new(db: Arc<Database>, blobs: Arc<BlobStore>, router: RoomRouter) -> Self {
        Self { db, blobs, router }
    }

    /// Store the content, append the manifest entry, announce `newFile`.
    ///
    /// A blob written before a failed append is left behind; the upload is
    /// never rolled back.
    pub async fn attach(&self, room_id: &str, req: AttachRequest) -> Result<FileRecord, CoreError> {
        let declared_name = req.name.filter(|n| !n.trim().is_empty());
        if req.content.is_none() && declared_name.is_none() {
            return Err(CoreError::invalid("no file content or file name"));
        }

        let db = self.db.clone();
        let rid = room_id.to_string();
        if !blocking(move || db.room_exists(&rid)).await? {
            return Err(CoreError::not_found(format!("room {}", room_id)));
        }

        let name = declared_name.unwrap_or_else(|| "untitled".to_string());
        let key = BlobStore::fresh_key(&name);
        let id = key[..16].to_string();

        // Files attached by reference have no blob and an empty content_ref
        let (content_ref, lines) = match &req.content {
            Some(bytes) => {
                self.blobs.store(&key, bytes).await?;
                (key, count_lines(bytes))
            }
            None => (String::new(), req.lines.unwrap_or(0)),
        };

        let file = FileRecord {
            id,
            ext: req
                .ext
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| extension_of(&name)),
            name,
            lines,
            read: false,
            content_ref,
        };

        let db = self.db.clone();
        let rid = room_id.to_string();
        let record = file.clone();
        if !blocking(move || db.append_file(&rid, &record)).await? {
            warn!("Room {} vanished during upload, blob {} orphaned", room_id, file.content_ref);
            return Err(CoreError::not_found(format!("room {}", room_id)));
        }
        info!("Attached {} ({} lines) to room {}", file.name, file.lines, room_id);

        self.router
            .announce(room_id, RoomEvent::NewFile(file.clone()))
            .await;
        Ok(file)
    }

    /// Raw content of the newest manifest entry named `file_name`.
    pub async fn fetch_content(&self, room_id: &str, file_name: &str) -> Result<Vec<u8>, CoreError> {
        let db = self.db.clone();
        let (rid, fname) = (room_id.to_string(), file_name.to_string());
        let (exists, file) = blocking(move || {
            Ok((db.room_exists(&rid)?, db.find_file_by_name(&rid, &fname)?))
        })
        .await?;

        if !exists {
            return Err(CoreError::not_found(format!("room {}", room_id)));
        }
        let file = file.ok_or_else(|| CoreError::not_found(format!("file {}", file_name)))?;
        if file.content_ref.is_empty() {
            return Err(CoreError::not_found(format!("content of {}", file_name)));
        }

        match self.blobs.retrieve(&file.content_ref).await? {
            Some(bytes) => Ok(bytes),
            None => {
                let fault = CoreError::StorageInconsistency(file.content_ref);
                error!("Room {} file {}: {}", room_id, file_name, fault);
                Err(CoreError::not_found(format!("content of {}", file_name)))
            }
        }
    }

    /// Flip the shared read flag and announce `fileRead`.
    pub async fn mark_read(&self, room_id: &str, file_id: &str, user_id: &str) -> Result<FileRecord, CoreError> {
        let db = self.db.clone();
        let (rid, fid) = (room_id.to_string(), file_id.to_string());
        let file = blocking(move || db.set_file_read(&rid, &fid, true))
            .await?
            .ok_or_else(|| CoreError::not_found(format!("file {} in room {}", file_id, room_id)))?;

        self.router
            .announce(
                room_id,
                RoomEvent::FileRead {
                    file_name: file.name.clone(),
                    user_id: user_id.to_string(),
                },
            )
            .await;
        Ok(file)
    }

    /// Drop a manifest entry and announce `fileDelete`. The blob stays.
    pub async fn remove(&self, room_id: &str, file_id: &str, user_id: &str) -> Result<FileRecord, CoreError> {
        let db = self.db.clone();
        let (rid, fid) = (room_id.to_string(), file_id.to_string());
        let file = blocking(move || db.remove_file(&rid, &fid))
            .await?
            .ok_or_else(|| CoreError::not_found(format!("file {} in room {}", file_id, room_id)))?;
        info!("Removed {} from room {}", file.name, room_id);

        self.router
            .announce(
                room_id,
                RoomEvent::FileDelete {
                    file_name: file.name.clone(),
                    user_id: user_id.to_string(),
                },
            )
            .await;
        Ok(file)
    }
}

/// Number of `\n`-separated segments of the text form. Best effort for
/// binary content.
pub fn count_lines(bytes: &[u8]) -> u64 {
    String::from_utf8_lossy(bytes).split('\n').count() as u64
}

fn extension_of(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_string())
        .unwrap_or_default()
}
