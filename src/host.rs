//! The record-store surface the editor core is written against, and the
//! JSON-backed in-memory implementation used by the standalone app and the
//! tests.
//!
//! The trait is deliberately narrow: cell reads, schema lookup, permission
//! checks carrying a human-readable denial reason, record CRUD, and
//! collaborator identity. Everything the editor persists goes through it.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EditorConfig;
use crate::error::EditorError;

pub type RecordId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    SingleLineText,
    MultilineText,
    RichText,
    Attachment,
    RecordLink,
}

impl FieldType {
    /// Field types accepted as a storage cell.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            FieldType::SingleLineText | FieldType::MultilineText | FieldType::RichText
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Target table for `RecordLink` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_table_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub filename: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Attachments(Vec<AttachmentRef>),
    Links(Vec<RecordId>),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_attachments(&self) -> Option<&[AttachmentRef]> {
        match self {
            CellValue::Attachments(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_links(&self) -> Option<&[RecordId]> {
        match self {
            CellValue::Links(l) => Some(l),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Cell values keyed by field id.
    #[serde(default)]
    pub cells: HashMap<String, CellValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub name: String,
    pub primary_field_id: String,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub records: Vec<Record>,
}

impl Table {
    pub fn field(&self, field_id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == field_id)
    }

    pub fn record(&self, record_id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == record_id)
    }

    /// The record's primary cell as a display string.
    pub fn primary_value<'a>(&self, record: &'a Record) -> &'a str {
        record
            .cells
            .get(&self.primary_field_id)
            .and_then(CellValue::as_text)
            .unwrap_or("")
    }
}

/// Outcome of a permission probe: a grant, or a denial with the
/// host-supplied reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionCheck {
    pub granted: bool,
    pub reason: Option<String>,
}

impl PermissionCheck {
    pub fn allow() -> Self {
        Self {
            granted: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: Some(reason.into()),
        }
    }

    pub fn reason_display(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| "You don't have permission to do this".to_string())
    }
}

/// Narrow interface over the host platform's record storage.
pub trait RecordStore {
    fn table(&self, table_id: &str) -> Option<&Table>;

    fn cell(&self, table_id: &str, record_id: &str, field_id: &str) -> Option<CellValue>;

    fn check_create_record(&self, table_id: &str) -> PermissionCheck;
    fn check_update_record(&self, table_id: &str, record_id: &str, field_id: &str)
        -> PermissionCheck;
    fn check_delete_record(&self, table_id: &str, record_id: &str) -> PermissionCheck;
    /// Whether the current collaborator may alter the table's schema.
    fn can_create_field(&self, table_id: &str) -> bool;

    fn create_record(
        &mut self,
        table_id: &str,
        cells: Vec<(String, CellValue)>,
    ) -> Result<RecordId, EditorError>;
    fn update_record(
        &mut self,
        table_id: &str,
        record_id: &str,
        cells: Vec<(String, CellValue)>,
    ) -> Result<(), EditorError>;
    fn delete_record(&mut self, table_id: &str, record_id: &str) -> Result<(), EditorError>;

    /// Monotonic counter bumped on every committed mutation; cheap change
    /// polling for callers that need to notice foreign edits.
    fn revision(&self) -> u64;

    fn current_collaborator(&self) -> &str;
    fn collaborator_name(&self, collaborator_id: &str) -> Option<String>;
}

// ── In-memory base ──────────────────────────────────────────────────────────

/// Tables, records and collaborators held in memory, loadable from and
/// savable to a JSON workspace file.
#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryBase {
    pub tables: Vec<Table>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<EditorConfig>,
    #[serde(default)]
    pub collaborators: HashMap<String, String>,
    #[serde(skip)]
    current_user: String,
    /// When set, every mutation is denied with this reason.
    #[serde(skip)]
    lock_reason: Option<String>,
    #[serde(skip)]
    revision: u64,
}

impl MemoryBase {
    pub fn new(current_user: impl Into<String>) -> Self {
        let current_user = current_user.into();
        let mut collaborators = HashMap::new();
        collaborators.insert(current_user.clone(), current_user.clone());
        Self {
            tables: Vec::new(),
            config: None,
            collaborators,
            current_user,
            lock_reason: None,
            revision: 0,
        }
    }

    /// A workspace with one annotations table and a valid config block.
    pub fn bootstrap(current_user: impl Into<String>) -> Self {
        let mut base = Self::new(current_user);
        base.tables.push(Table {
            id: "tblAnnotations".to_string(),
            name: "Annotations".to_string(),
            primary_field_id: "fldName".to_string(),
            fields: vec![
                Field {
                    id: "fldName".to_string(),
                    name: "Name".to_string(),
                    field_type: FieldType::SingleLineText,
                    linked_table_id: None,
                },
                Field {
                    id: "fldImage".to_string(),
                    name: "Image".to_string(),
                    field_type: FieldType::Attachment,
                    linked_table_id: None,
                },
                Field {
                    id: "fldStore".to_string(),
                    name: "Store".to_string(),
                    field_type: FieldType::MultilineText,
                    linked_table_id: None,
                },
            ],
            records: Vec::new(),
        });
        base.config = Some(EditorConfig {
            annotations_table_id: "tblAnnotations".to_string(),
            storage_field_id: "fldStore".to_string(),
            image_field_id: Some("fldImage".to_string()),
        });
        base
    }

    pub fn load(path: &Path, current_user: impl Into<String>) -> Result<Self, EditorError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| EditorError::Transport(format!("{}: {e}", path.display())))?;
        let mut base: MemoryBase = serde_json::from_str(&data)
            .map_err(|e| EditorError::Transport(format!("{} is not a workspace file: {e}", path.display())))?;
        base.current_user = current_user.into();
        base.collaborators
            .entry(base.current_user.clone())
            .or_insert_with(|| base.current_user.clone());
        if std::fs::metadata(path)
            .map(|m| m.permissions().readonly())
            .unwrap_or(false)
        {
            base.lock_reason = Some("The workspace file is read-only".to_string());
        }
        Ok(base)
    }

    pub fn save(&self, path: &Path) -> Result<(), EditorError> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| EditorError::Transport(e.to_string()))?;
        std::fs::write(path, data).map_err(|e| EditorError::Transport(e.to_string()))
    }

    /// Deny all mutations with the given reason (used by tests and by the
    /// read-only workspace path).
    pub fn lock(&mut self, reason: impl Into<String>) {
        self.lock_reason = Some(reason.into());
    }

    pub fn unlock(&mut self) {
        self.lock_reason = None;
    }

    fn table_mut(&mut self, table_id: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == table_id)
    }

    fn gate(&self) -> PermissionCheck {
        match &self.lock_reason {
            Some(reason) => PermissionCheck::deny(reason.clone()),
            None => PermissionCheck::allow(),
        }
    }

    fn gate_mutation(&self) -> Result<(), EditorError> {
        match &self.lock_reason {
            Some(reason) => Err(EditorError::PermissionDenied(reason.clone())),
            None => Ok(()),
        }
    }
}

impl RecordStore for MemoryBase {
    fn table(&self, table_id: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == table_id)
    }

    fn cell(&self, table_id: &str, record_id: &str, field_id: &str) -> Option<CellValue> {
        self.table(table_id)?
            .record(record_id)?
            .cells
            .get(field_id)
            .cloned()
    }

    fn check_create_record(&self, _table_id: &str) -> PermissionCheck {
        self.gate()
    }

    fn check_update_record(
        &self,
        _table_id: &str,
        _record_id: &str,
        _field_id: &str,
    ) -> PermissionCheck {
        self.gate()
    }

    fn check_delete_record(&self, _table_id: &str, _record_id: &str) -> PermissionCheck {
        self.gate()
    }

    fn can_create_field(&self, _table_id: &str) -> bool {
        self.lock_reason.is_none()
    }

    fn create_record(
        &mut self,
        table_id: &str,
        cells: Vec<(String, CellValue)>,
    ) -> Result<RecordId, EditorError> {
        self.gate_mutation()?;
        let table = self
            .table_mut(table_id)
            .ok_or_else(|| EditorError::NotFound(format!("Table {table_id} was deleted")))?;
        let id = format!("rec{}", Uuid::new_v4().simple());
        table.records.push(Record {
            id: id.clone(),
            cells: cells.into_iter().collect(),
        });
        self.revision += 1;
        Ok(id)
    }

    fn update_record(
        &mut self,
        table_id: &str,
        record_id: &str,
        cells: Vec<(String, CellValue)>,
    ) -> Result<(), EditorError> {
        self.gate_mutation()?;
        let table = self
            .table_mut(table_id)
            .ok_or_else(|| EditorError::NotFound(format!("Table {table_id} was deleted")))?;
        let record = table
            .records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| EditorError::NotFound("Someone deleted the selected record".to_string()))?;
        for (field_id, value) in cells {
            record.cells.insert(field_id, value);
        }
        self.revision += 1;
        Ok(())
    }

    fn delete_record(&mut self, table_id: &str, record_id: &str) -> Result<(), EditorError> {
        self.gate_mutation()?;
        let table = self
            .table_mut(table_id)
            .ok_or_else(|| EditorError::NotFound(format!("Table {table_id} was deleted")))?;
        let before = table.records.len();
        table.records.retain(|r| r.id != record_id);
        if table.records.len() == before {
            return Err(EditorError::NotFound(
                "Someone deleted the selected record".to_string(),
            ));
        }
        self.revision += 1;
        Ok(())
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn current_collaborator(&self) -> &str {
        &self.current_user
    }

    fn collaborator_name(&self, collaborator_id: &str) -> Option<String> {
        self.collaborators.get(collaborator_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_has_a_valid_config() {
        let base = MemoryBase::bootstrap("usrA");
        let config = base.config.clone().unwrap();
        let table = base.table(&config.annotations_table_id).unwrap();
        assert!(table.field(&config.storage_field_id).unwrap().field_type.is_text());
    }

    #[test]
    fn crud_round_trip() {
        let mut base = MemoryBase::bootstrap("usrA");
        let id = base
            .create_record(
                "tblAnnotations",
                vec![("fldName".to_string(), CellValue::Text("a.png".to_string()))],
            )
            .unwrap();
        assert_eq!(
            base.cell("tblAnnotations", &id, "fldName"),
            Some(CellValue::Text("a.png".to_string()))
        );
        base.update_record(
            "tblAnnotations",
            &id,
            vec![("fldStore".to_string(), CellValue::Text("blob".to_string()))],
        )
        .unwrap();
        assert_eq!(base.revision(), 2);
        base.delete_record("tblAnnotations", &id).unwrap();
        assert!(base.cell("tblAnnotations", &id, "fldName").is_none());
    }

    #[test]
    fn locked_base_denies_with_reason() {
        let mut base = MemoryBase::bootstrap("usrA");
        base.lock("Your role is read-only");
        let check = base.check_update_record("tblAnnotations", "recX", "fldStore");
        assert!(!check.granted);
        assert_eq!(check.reason.as_deref(), Some("Your role is read-only"));
        let err = base
            .create_record("tblAnnotations", Vec::new())
            .unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[test]
    fn workspace_file_round_trip() {
        let mut base = MemoryBase::bootstrap("usrA");
        base.create_record(
            "tblAnnotations",
            vec![("fldName".to_string(), CellValue::Text("x".to_string()))],
        )
        .unwrap();
        let path = std::env::temp_dir().join(format!("redline-ws-{}.json", std::process::id()));
        base.save(&path).unwrap();
        let reloaded = MemoryBase::load(&path, "usrB").unwrap();
        assert_eq!(reloaded.tables, base.tables);
        assert_eq!(reloaded.current_collaborator(), "usrB");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn untagged_cell_values_deserialize_by_shape() {
        let text: CellValue = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(text.as_text(), Some("hello"));
        let links: CellValue = serde_json::from_str("[\"recA\",\"recB\"]").unwrap();
        assert_eq!(links.as_links().map(|l| l.len()), Some(2));
        let atts: CellValue =
            serde_json::from_str("[{\"id\":\"att1\",\"filename\":\"a.png\"}]").unwrap();
        assert_eq!(atts.as_attachments().unwrap()[0].filename, "a.png");
    }
}
