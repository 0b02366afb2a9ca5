//! Owns the read/write contract between one annotation's storage field and
//! the in-memory scene.
//!
//! Edits queue a pending write with a deadline; each new edit restarts the
//! deadline, so a burst of edits lands as a single store mutation once the
//! canvas settles. The in-memory scene is the source of truth: failed writes
//! are reported but never rolled back.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::codec::{compress_to_base64, decompress_from_base64};
use crate::error::EditorError;
use crate::host::{CellValue, RecordId, RecordStore};

/// Quiet period between the last edit and the store write.
pub const WRITE_DEBOUNCE: Duration = Duration::from_millis(200);

/// Last observed update-permission status for the bound storage cell.
/// The view layer watches this to show the lock indicator and the
/// "changes will not be saved" notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionState {
    pub granted: bool,
    pub reason: Option<String>,
}

impl Default for PermissionState {
    fn default() -> Self {
        Self {
            granted: true,
            reason: None,
        }
    }
}

impl PermissionState {
    pub fn reason_display(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| "You don't have permission to update this record".to_string())
    }
}

#[derive(Debug)]
struct PendingWrite {
    deadline: Instant,
    /// Scene JSON, or `None` when the scene emptied out.
    value: Option<String>,
}

#[derive(Debug)]
pub struct AnnotationBinding {
    table_id: String,
    storage_field_id: String,
    /// Primary-field value used when the record is created lazily.
    attachment_id: String,
    record_id: Option<RecordId>,
    /// The compressed value we last saw in (or wrote to) the store.
    last_remote: Option<String>,
    pending: Option<PendingWrite>,
    permission: PermissionState,
}

impl AnnotationBinding {
    pub fn new(
        table_id: impl Into<String>,
        storage_field_id: impl Into<String>,
        attachment_id: impl Into<String>,
        record_id: Option<RecordId>,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            storage_field_id: storage_field_id.into(),
            attachment_id: attachment_id.into(),
            record_id,
            last_remote: None,
            pending: None,
            permission: PermissionState::default(),
        }
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn permission(&self) -> &PermissionState {
        &self.permission
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn stored_value(&self, store: &dyn RecordStore) -> Option<String> {
        let record_id = self.record_id.as_deref()?;
        store
            .cell(&self.table_id, record_id, &self.storage_field_id)
            .and_then(|cell| cell.as_text().map(str::to_string))
    }

    /// Read and decode the persisted scene. Malformed stored data degrades
    /// to "no scene" so a corrupt blob never blocks viewing the image.
    pub fn read(&mut self, store: &dyn RecordStore) -> Option<String> {
        let raw = self.stored_value(store)?;
        let decoded = decompress_from_base64(&raw);
        if decoded.is_none() {
            debug!(record = ?self.record_id, "stored annotation value is malformed; treating as empty");
        }
        self.last_remote = Some(raw);
        decoded
    }

    /// Probe update permission on the storage cell and record the transition.
    pub fn refresh_permission(&mut self, store: &dyn RecordStore) -> &PermissionState {
        if let Some(record_id) = self.record_id.as_deref() {
            let check = store.check_update_record(&self.table_id, record_id, &self.storage_field_id);
            self.permission = PermissionState {
                granted: check.granted,
                reason: check.reason,
            };
        }
        &self.permission
    }

    /// Queue a write of the scene snapshot, restarting the quiet period.
    pub fn queue(&mut self, value: Option<String>, now: Instant) {
        self.pending = Some(PendingWrite {
            deadline: now + WRITE_DEBOUNCE,
            value,
        });
    }

    /// Fire the pending write if its deadline has passed. Returns whether a
    /// store mutation was attempted this tick. Transport errors clear the
    /// pending write (no automatic retry) and bubble up for display.
    pub fn tick(
        &mut self,
        store: &mut dyn RecordStore,
        now: Instant,
    ) -> Result<bool, EditorError> {
        match self.pending.take() {
            Some(pending) if now >= pending.deadline => self.write_store(store, pending.value),
            other => {
                self.pending = other;
                Ok(false)
            }
        }
    }

    /// Push a snapshot straight through, bypassing the debounce. Used by the
    /// tests and by teardown paths that cannot wait for a deadline.
    pub fn write_store(
        &mut self,
        store: &mut dyn RecordStore,
        value: Option<String>,
    ) -> Result<bool, EditorError> {
        match value {
            None => self.delete_if_allowed(store),
            Some(json) => self.upsert(store, &json),
        }
    }

    /// The scene emptied out: drop the record entirely when delete
    /// permission is held, otherwise leave everything as is.
    fn delete_if_allowed(&mut self, store: &mut dyn RecordStore) -> Result<bool, EditorError> {
        let Some(record_id) = self.record_id.clone() else {
            return Ok(false);
        };
        let check = store.check_delete_record(&self.table_id, &record_id);
        if !check.granted {
            debug!(record = %record_id, "scene emptied but delete permission missing; keeping record");
            return Ok(false);
        }
        store.delete_record(&self.table_id, &record_id)?;
        debug!(record = %record_id, "deleted empty annotation record");
        self.record_id = None;
        self.last_remote = None;
        Ok(true)
    }

    fn upsert(&mut self, store: &mut dyn RecordStore, json: &str) -> Result<bool, EditorError> {
        let compressed = compress_to_base64(json);

        let Some(record_id) = self.record_id.clone() else {
            return self.create_record(store, compressed);
        };

        let current = store
            .cell(&self.table_id, &record_id, &self.storage_field_id)
            .and_then(|cell| cell.as_text().map(str::to_string));
        if current.as_deref() == Some(compressed.as_str()) {
            self.last_remote = current;
            return Ok(false);
        }

        let field_is_text = store
            .table(&self.table_id)
            .and_then(|t| t.field(&self.storage_field_id))
            .map(|f| f.field_type.is_text())
            .unwrap_or(false);
        if !field_is_text {
            warn!(field = %self.storage_field_id, "storage field is not text-typed; skipping write");
            return Ok(false);
        }

        let check = store.check_update_record(&self.table_id, &record_id, &self.storage_field_id);
        if !check.granted {
            // silent skip per contract; the denial is observable through
            // the permission state
            self.permission = PermissionState {
                granted: false,
                reason: check.reason,
            };
            debug!(record = %record_id, "update permission denied; write skipped");
            return Ok(false);
        }

        store.update_record(
            &self.table_id,
            &record_id,
            vec![(self.storage_field_id.clone(), CellValue::Text(compressed.clone()))],
        )?;
        self.permission = PermissionState::default();
        self.last_remote = Some(compressed);
        Ok(true)
    }

    /// First write for an attachment with no record yet: create one seeded
    /// with the attachment identity and the compressed scene.
    fn create_record(
        &mut self,
        store: &mut dyn RecordStore,
        compressed: String,
    ) -> Result<bool, EditorError> {
        let check = store.check_create_record(&self.table_id);
        if !check.granted {
            self.permission = PermissionState {
                granted: false,
                reason: check.reason,
            };
            debug!("create permission denied; annotation not persisted");
            return Ok(false);
        }
        let primary_field_id = store
            .table(&self.table_id)
            .map(|t| t.primary_field_id.clone())
            .ok_or_else(|| EditorError::NotFound("The annotations table was deleted".to_string()))?;

        let record_id = store.create_record(
            &self.table_id,
            vec![
                (primary_field_id, CellValue::Text(self.attachment_id.clone())),
                (self.storage_field_id.clone(), CellValue::Text(compressed.clone())),
            ],
        )?;
        debug!(record = %record_id, attachment = %self.attachment_id, "created annotation record");
        self.record_id = Some(record_id);
        self.last_remote = Some(compressed);
        Ok(true)
    }

    /// Change suppression for the remote→local direction: returns the remote
    /// scene JSON only when it actually differs from the freshly computed
    /// local export, so importing an echo of our own write never happens.
    pub fn should_import(
        &mut self,
        store: &dyn RecordStore,
        local_export: Option<&str>,
    ) -> Option<String> {
        let raw = self.stored_value(store);
        let remote = raw.as_deref().and_then(decompress_from_base64);
        self.last_remote = raw;
        match remote {
            Some(remote_json) if Some(remote_json.as_str()) != local_export => Some(remote_json),
            _ => None,
        }
    }
}
