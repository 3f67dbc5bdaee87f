use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use whatsgate_shared::Jid;

use crate::database::Database;
use crate::error::Result;
use crate::models::DeviceRecord;

const DEVICE_COLUMNS: &str =
    "id, jid, push_name, platform, credentials, created_at, updated_at";

impl Database {
    /// Look up a device by its full JID.
    pub fn get_device(&self, jid: &Jid) -> Result<Option<DeviceRecord>> {
        let device = self
            .conn()
            .query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE jid = ?1"),
                params![jid.to_string()],
                row_to_device,
            )
            .optional()?;
        Ok(device)
    }

    /// A fresh device record, not yet persisted.
    pub fn new_device(&self) -> DeviceRecord {
        DeviceRecord::new()
    }

    /// Insert or update `device`, keyed by row id, then by JID.
    ///
    /// On insert the new row id is written back into `device`.
    pub fn save_device(&self, device: &mut DeviceRecord) -> Result<()> {
        device.updated_at = Utc::now();
        let jid = device.jid.as_ref().map(|j| j.to_string());

        if device.row_id.is_none() {
            if let Some(jid) = &jid {
                device.row_id = self
                    .conn()
                    .query_row(
                        "SELECT id FROM devices WHERE jid = ?1",
                        params![jid],
                        |row| row.get(0),
                    )
                    .optional()?;
            }
        }

        match device.row_id {
            Some(id) => {
                self.conn().execute(
                    "UPDATE devices
                     SET jid = ?1, push_name = ?2, platform = ?3, credentials = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![
                        jid,
                        device.push_name,
                        device.platform,
                        device.credentials,
                        device.updated_at.to_rfc3339(),
                        id,
                    ],
                )?;
            }
            None => {
                self.conn().execute(
                    "INSERT INTO devices (jid, push_name, platform, credentials, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        jid,
                        device.push_name,
                        device.platform,
                        device.credentials,
                        device.created_at.to_rfc3339(),
                        device.updated_at.to_rfc3339(),
                    ],
                )?;
                device.row_id = Some(self.conn().last_insert_rowid());
            }
        }

        Ok(())
    }

    pub fn get_all_devices(&self) -> Result<Vec<DeviceRecord>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id ASC"))?;

        let rows = stmt.query_map([], row_to_device)?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    /// Remove a device row. Unsaved records are a no-op returning `false`.
    pub fn delete_device(&self, device: &DeviceRecord) -> Result<bool> {
        let Some(id) = device.row_id else {
            return Ok(false);
        };
        let affected = self
            .conn()
            .execute("DELETE FROM devices WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn delete_device_by_jid(&self, jid: &Jid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM devices WHERE jid = ?1", params![jid.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRecord> {
    let row_id: i64 = row.get(0)?;
    let jid_str: Option<String> = row.get(1)?;
    let push_name: String = row.get(2)?;
    let platform: String = row.get(3)?;
    let credentials: Vec<u8> = row.get(4)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    let jid = jid_str
        .map(|s| Jid::parse(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(DeviceRecord {
        row_id: Some(row_id),
        jid,
        push_name,
        platform,
        credentials,
        created_at: parse_timestamp(5, &created_str)?,
        updated_at: parse_timestamp(6, &updated_str)?,
    })
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired(jid: &str) -> DeviceRecord {
        let mut device = DeviceRecord::new();
        device.jid = Some(Jid::parse(jid).unwrap());
        device.push_name = "Alice".into();
        device.credentials = vec![1, 2, 3];
        device
    }

    #[test]
    fn save_and_get() {
        let db = Database::open_in_memory().unwrap();
        let mut device = paired("1555:4@s.whatsapp.net");
        db.save_device(&mut device).unwrap();
        assert!(device.row_id.is_some());

        let jid = device.jid.clone().unwrap();
        let loaded = db.get_device(&jid).unwrap().expect("device saved");
        assert_eq!(loaded.push_name, "Alice");
        assert_eq!(loaded.credentials, vec![1, 2, 3]);
        assert_eq!(loaded.row_id, device.row_id);
    }

    #[test]
    fn missing_device_is_none() {
        let db = Database::open_in_memory().unwrap();
        let jid = Jid::parse("1555:4@s.whatsapp.net").unwrap();
        assert!(db.get_device(&jid).unwrap().is_none());
    }

    #[test]
    fn new_device_is_not_persisted() {
        let db = Database::open_in_memory().unwrap();
        let device = db.new_device();
        assert!(device.row_id.is_none());
        assert!(db.get_all_devices().unwrap().is_empty());
    }

    #[test]
    fn save_updates_by_jid() {
        let db = Database::open_in_memory().unwrap();
        let mut first = paired("1555:4@s.whatsapp.net");
        db.save_device(&mut first).unwrap();

        let mut second = paired("1555:4@s.whatsapp.net");
        second.push_name = "Alice B".into();
        db.save_device(&mut second).unwrap();

        let all = db.get_all_devices().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].push_name, "Alice B");
        assert_eq!(second.row_id, first.row_id);
    }

    #[test]
    fn rows_without_jid_are_listed() {
        let db = Database::open_in_memory().unwrap();
        let mut broken = DeviceRecord::new();
        db.save_device(&mut broken).unwrap();
        let mut good = paired("1555:4@s.whatsapp.net");
        db.save_device(&mut good).unwrap();

        let all = db.get_all_devices().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].jid.is_none());
    }

    #[test]
    fn delete() {
        let db = Database::open_in_memory().unwrap();
        let mut device = paired("1555:4@s.whatsapp.net");
        assert!(!db.delete_device(&device).unwrap());

        db.save_device(&mut device).unwrap();
        assert!(db.delete_device(&device).unwrap());
        assert!(db.get_all_devices().unwrap().is_empty());

        db.save_device(&mut paired("1555:5@s.whatsapp.net")).unwrap();
        let jid = Jid::parse("1555:5@s.whatsapp.net").unwrap();
        assert!(db.delete_device_by_jid(&jid).unwrap());
    }
}
