//! The persisted editor configuration: which table holds annotations and
//! which fields carry the image and the serialized scene. A missing or
//! dangling config routes the user to the setup screen instead of the editor.

use serde::{Deserialize, Serialize};

use crate::error::EditorError;
use crate::host::{FieldType, RecordStore};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditorConfig {
    pub annotations_table_id: String,
    pub storage_field_id: String,
    /// Absent in single-table setups, where the annotation's primary field
    /// is the attachment identifier itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_field_id: Option<String>,
}

impl EditorConfig {
    /// Check the config against the live schema, returning a message that
    /// tells the user exactly what to fix.
    pub fn validate(&self, store: &dyn RecordStore) -> Result<(), EditorError> {
        let table = store.table(&self.annotations_table_id).ok_or_else(|| {
            EditorError::SchemaMisconfigured(
                "The annotations table is missing. Pick one in setup.".to_string(),
            )
        })?;

        let storage = table.field(&self.storage_field_id).ok_or_else(|| {
            EditorError::SchemaMisconfigured(format!(
                "The storage field is missing from '{}'. Pick one in setup.",
                table.name
            ))
        })?;
        if !storage.field_type.is_text() {
            return Err(EditorError::SchemaMisconfigured(format!(
                "The storage field '{}' must be a text field.",
                storage.name
            )));
        }

        if let Some(image_field_id) = &self.image_field_id {
            let image = table.field(image_field_id).ok_or_else(|| {
                EditorError::SchemaMisconfigured(format!(
                    "The image field is missing from '{}'. Pick one in setup.",
                    table.name
                ))
            })?;
            if image.field_type != FieldType::Attachment {
                return Err(EditorError::SchemaMisconfigured(format!(
                    "The image field '{}' must be an attachment field.",
                    image.name
                )));
            }
        }
        Ok(())
    }
}
