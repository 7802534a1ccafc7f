//! Automation definitions.

use rusqlite::{OptionalExtension, params};

use hntr_core::{
    Automation, AutomationWithCount, BoxRecord, HntrError, NewAutomation, RecordFilter, Result,
};

use crate::{Database, db_err, parse_timestamp, tags_from_json, tags_to_json, timestamp};

const COLUMNS: &str = "id, box_id, name, description, command, source_container, source_tags, \
                       destination_container, destination_tags, is_public, created_at";

fn row_to_automation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Automation> {
    let source_tags: String = row.get(6)?;
    let destination_tags: String = row.get(8)?;
    let created_at: String = row.get(10)?;
    Ok(Automation {
        id: row.get(0)?,
        box_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        command: row.get(4)?,
        source_container: row.get(5)?,
        source_tags: tags_from_json(&source_tags),
        destination_container: row.get(7)?,
        destination_tags: tags_from_json(&destination_tags),
        is_public: row.get::<_, i32>(9)? != 0,
        created_at: parse_timestamp(&created_at),
    })
}

/// Both ends of an automation must be containers declared on its box.
fn check_containers(b: &BoxRecord, source: &str, destination: &str) -> Result<()> {
    for c in [source, destination] {
        if !b.has_container(c) {
            return Err(HntrError::NotFound(format!(
                "container '{c}' in box {}",
                b.id
            )));
        }
    }
    Ok(())
}

impl Database {
    pub fn create_automation(&self, box_id: &str, new: NewAutomation) -> Result<Automation> {
        let new = new.validate()?;
        let b = self.get_box(box_id)?;
        check_containers(&b, &new.source_container, &new.destination_container)?;

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = timestamp();
        {
            let conn = self.conn()?;
            db_err!(conn.execute(
                &format!("INSERT INTO automations ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
                params![
                    id,
                    box_id,
                    new.name,
                    new.description,
                    new.command,
                    new.source_container,
                    tags_to_json(&new.source_tags),
                    new.destination_container,
                    tags_to_json(&new.destination_tags),
                    new.is_public as i32,
                    created_at,
                ],
            ))?;
        }
        tracing::info!("⚙️ Automation created: '{}' ({})", new.name, id);

        Ok(Automation {
            id,
            box_id: box_id.to_string(),
            name: new.name,
            description: new.description,
            command: new.command,
            source_container: new.source_container,
            source_tags: new.source_tags,
            destination_container: new.destination_container,
            destination_tags: new.destination_tags,
            is_public: new.is_public,
            created_at: parse_timestamp(&created_at),
        })
    }

    pub fn get_automation(&self, id: &str) -> Result<Automation> {
        let conn = self.conn()?;
        db_err!(
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM automations WHERE id = ?1"),
                [id],
                row_to_automation,
            )
            .optional()
        )?
        .ok_or_else(|| HntrError::NotFound(format!("automation {id}")))
    }

    pub fn list_automations(&self, box_id: &str) -> Result<Vec<Automation>> {
        let conn = self.conn()?;
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {COLUMNS} FROM automations WHERE box_id = ?1 ORDER BY created_at"
        )))?;
        let rows = db_err!(stmt.query_map([box_id], row_to_automation))?;
        db_err!(rows.collect::<rusqlite::Result<Vec<_>>>())
    }

    /// Automations of a box together with how many records currently match
    /// their source filter.
    pub fn list_automations_with_source_count(
        &self,
        box_id: &str,
    ) -> Result<Vec<AutomationWithCount>> {
        self.list_automations(box_id)?
            .into_iter()
            .map(|automation| {
                let filter = RecordFilter::with_tags(automation.source_tags.clone());
                let source_count =
                    self.count_records(box_id, &automation.source_container, &filter)?;
                Ok(AutomationWithCount {
                    automation,
                    source_count,
                })
            })
            .collect()
    }

    /// Public automations, shared across boxes as templates.
    pub fn list_automation_library(&self) -> Result<Vec<Automation>> {
        let conn = self.conn()?;
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {COLUMNS} FROM automations WHERE is_public = 1 ORDER BY name"
        )))?;
        let rows = db_err!(stmt.query_map([], row_to_automation))?;
        db_err!(rows.collect::<rusqlite::Result<Vec<_>>>())
    }

    pub fn update_automation(&self, id: &str, new: NewAutomation) -> Result<Automation> {
        let new = new.validate()?;
        let current = self.get_automation(id)?;
        let b = self.get_box(&current.box_id)?;
        check_containers(&b, &new.source_container, &new.destination_container)?;

        {
            let conn = self.conn()?;
            db_err!(conn.execute(
                "UPDATE automations SET
                    name = ?1, description = ?2, command = ?3,
                    source_container = ?4, source_tags = ?5,
                    destination_container = ?6, destination_tags = ?7, is_public = ?8
                 WHERE id = ?9",
                params![
                    new.name,
                    new.description,
                    new.command,
                    new.source_container,
                    tags_to_json(&new.source_tags),
                    new.destination_container,
                    tags_to_json(&new.destination_tags),
                    new.is_public as i32,
                    id,
                ],
            ))?;
        }
        self.get_automation(id)
    }

    /// Delete an automation together with its events.
    pub fn delete_automation(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = db_err!(conn.execute("DELETE FROM automations WHERE id = ?1", [id]))?;
        if changed == 0 {
            return Err(HntrError::NotFound(format!("automation {id}")));
        }
        tracing::info!("🗑️ Automation deleted: {id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hntr_core::OnConflict;

    fn httpx() -> NewAutomation {
        NewAutomation {
            name: "httpx".into(),
            description: "Find http services".into(),
            command: "echo {data} | httpx".into(),
            source_container: "hostnames".into(),
            source_tags: vec!["scope".into()],
            destination_container: "urls".into(),
            destination_tags: vec!["source:httpx".into()],
            is_public: false,
        }
    }

    #[test]
    fn test_create_and_get() {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_default_box().unwrap();
        let a = db.create_automation(&b.id, httpx()).unwrap();
        let loaded = db.get_automation(&a.id).unwrap();
        assert_eq!(loaded, a);
        assert_eq!(db.list_automations(&b.id).unwrap().len(), 1);
    }

    #[test]
    fn test_create_rejects_undeclared_container() {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_box("Recon", &["hostnames".into()]).unwrap();
        let err = db.create_automation(&b.id, httpx()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_source_count() {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_default_box().unwrap();
        db.create_automation(&b.id, httpx()).unwrap();
        db.batch_insert(&b.id, "hostnames", ["a.com", "b.com"], &["scope".to_string()], 10, OnConflict::Skip)
            .unwrap();
        db.insert_record(&b.id, "hostnames", "c.com", &[], OnConflict::Skip)
            .unwrap();

        let listed = db.list_automations_with_source_count(&b.id).unwrap();
        assert_eq!(listed[0].source_count, 2);
    }

    #[test]
    fn test_library_lists_public_only() {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_default_box().unwrap();
        db.create_automation(&b.id, httpx()).unwrap();
        db.create_automation(
            &b.id,
            NewAutomation {
                name: "amass".into(),
                is_public: true,
                ..httpx()
            },
        )
        .unwrap();
        let lib = db.list_automation_library().unwrap();
        assert_eq!(lib.len(), 1);
        assert_eq!(lib[0].name, "amass");
    }

    #[test]
    fn test_update_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_default_box().unwrap();
        let a = db.create_automation(&b.id, httpx()).unwrap();
        let updated = db
            .update_automation(
                &a.id,
                NewAutomation {
                    command: "subfinder -d {data}".into(),
                    destination_container: "hostnames".into(),
                    ..httpx()
                },
            )
            .unwrap();
        assert_eq!(updated.command, "subfinder -d {data}");
        assert_eq!(updated.destination_container, "hostnames");

        db.delete_automation(&a.id).unwrap();
        assert!(db.get_automation(&a.id).unwrap_err().is_not_found());
    }
}
