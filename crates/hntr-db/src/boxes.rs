//! Box CRUD.

use rusqlite::{OptionalExtension, params};

use hntr_core::validate::{normalize_containers, validate_box_name};
use hntr_core::{BoxRecord, HntrError, Result};

use crate::{Database, db_err, parse_timestamp, timestamp};

/// Containers a freshly created box starts with.
pub const DEFAULT_CONTAINERS: [&str; 3] = ["hostnames", "urls", "events"];

fn row_to_box(row: &rusqlite::Row<'_>) -> rusqlite::Result<BoxRecord> {
    let containers: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    Ok(BoxRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        containers: serde_json::from_str(&containers).unwrap_or_default(),
        created_at: parse_timestamp(&created_at),
    })
}

impl Database {
    /// Create a box. Container names are lower-cased.
    pub fn create_box(&self, name: &str, containers: &[String]) -> Result<BoxRecord> {
        validate_box_name(name)?;
        let containers = normalize_containers(containers)?;
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = timestamp();

        let conn = self.conn()?;
        db_err!(conn.execute(
            "INSERT INTO boxes (id, name, containers, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                name.trim(),
                serde_json::to_string(&containers).unwrap_or_else(|_| "[]".into()),
                created_at
            ],
        ))?;
        tracing::info!("📦 Box created: '{}' ({})", name.trim(), id);

        Ok(BoxRecord {
            id,
            name: name.trim().to_string(),
            containers,
            created_at: parse_timestamp(&created_at),
        })
    }

    /// Create an "Unnamed Box" with the default containers.
    pub fn create_default_box(&self) -> Result<BoxRecord> {
        let containers: Vec<String> = DEFAULT_CONTAINERS.iter().map(|c| c.to_string()).collect();
        self.create_box("Unnamed Box", &containers)
    }

    pub fn get_box(&self, id: &str) -> Result<BoxRecord> {
        let conn = self.conn()?;
        db_err!(
            conn.query_row(
                "SELECT id, name, containers, created_at FROM boxes WHERE id = ?1",
                [id],
                row_to_box,
            )
            .optional()
        )?
        .ok_or_else(|| HntrError::NotFound(format!("box {id}")))
    }

    pub fn list_boxes(&self) -> Result<Vec<BoxRecord>> {
        let conn = self.conn()?;
        let mut stmt = db_err!(
            conn.prepare("SELECT id, name, containers, created_at FROM boxes ORDER BY created_at")
        )?;
        let rows = db_err!(stmt.query_map([], row_to_box))?;
        db_err!(rows.collect::<rusqlite::Result<Vec<_>>>())
    }

    /// Rename a box and replace its container list.
    pub fn update_box(&self, id: &str, name: &str, containers: &[String]) -> Result<BoxRecord> {
        validate_box_name(name)?;
        let containers = normalize_containers(containers)?;
        {
            let conn = self.conn()?;
            let changed = db_err!(conn.execute(
                "UPDATE boxes SET name = ?1, containers = ?2 WHERE id = ?3",
                params![
                    name.trim(),
                    serde_json::to_string(&containers).unwrap_or_else(|_| "[]".into()),
                    id
                ],
            ))?;
            if changed == 0 {
                return Err(HntrError::NotFound(format!("box {id}")));
            }
        }
        self.get_box(id)
    }

    /// Delete a box; records, automations and events go with it.
    pub fn delete_box(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = db_err!(conn.execute("DELETE FROM boxes WHERE id = ?1", [id]))?;
        if changed == 0 {
            return Err(HntrError::NotFound(format!("box {id}")));
        }
        tracing::info!("🗑️ Box deleted: {id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get_box() {
        let db = Database::open_in_memory().unwrap();
        let b = db
            .create_box("Recon", &["Hostnames".into(), "urls".into()])
            .unwrap();
        assert_eq!(b.containers, vec!["hostnames".to_string(), "urls".to_string()]);

        let loaded = db.get_box(&b.id).unwrap();
        assert_eq!(loaded.name, "Recon");
        assert!(loaded.has_container("hostnames"));
        assert!(!loaded.has_container("Hostnames"));
    }

    #[test]
    fn test_default_box() {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_default_box().unwrap();
        assert_eq!(b.name, "Unnamed Box");
        assert_eq!(b.containers.len(), 3);
    }

    #[test]
    fn test_get_missing_box() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_box("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_box() {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_default_box().unwrap();
        let updated = db.update_box(&b.id, "Target", &["domains".into()]).unwrap();
        assert_eq!(updated.name, "Target");
        assert_eq!(updated.containers, vec!["domains".to_string()]);
        assert!(db.update_box("missing", "Target", &["domains".into()]).is_err());
    }

    #[test]
    fn test_delete_box_cascades_records() {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_default_box().unwrap();
        db.batch_insert(
            &b.id,
            "hostnames",
            ["a.example.com".to_string()],
            &[],
            10,
            hntr_core::OnConflict::Skip,
        )
        .unwrap();
        db.delete_box(&b.id).unwrap();
        assert_eq!(db.count_records_by_box(&b.id).unwrap(), 0);
        assert!(db.delete_box(&b.id).is_err());
    }
}
