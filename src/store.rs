//! Track Store: append-only per-vessel position log plus the
//! supporting lookup tables, backed by an embedded relational engine
//! with write-ahead logging.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::geo::BoundingBox;
use crate::models::{Position, SarDetection, VesselInfo};

#[derive(Clone)]
pub struct TrackStore {
    conn: Arc<Mutex<Connection>>,
}

impl TrackStore {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| anyhow::anyhow!("opening track store at {db_path}: {e}"))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Additive migrations only — every statement is `IF NOT EXISTS`.
    fn migrate(conn: &Connection) -> anyhow::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS vessels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mmsi TEXT UNIQUE NOT NULL,
                imo TEXT,
                name TEXT,
                callsign TEXT,
                ship_type_code INTEGER,
                ship_type_text TEXT,
                length_m REAL,
                width_m REAL,
                draught_m REAL,
                flag_state TEXT,
                destination TEXT,
                eta TEXT,
                source_id TEXT,
                last_updated INTEGER
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vessel_id INTEGER NOT NULL REFERENCES vessels(id),
                mmsi TEXT NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                speed_knots REAL,
                course_deg REAL,
                heading_deg REAL,
                nav_status_code INTEGER,
                source_id TEXT NOT NULL,
                source_received_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_positions_mmsi_ts ON positions(mmsi, timestamp DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_positions_ts ON positions(timestamp)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_positions_box ON positions(lat, lon)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vessel_id INTEGER REFERENCES vessels(id),
                event_type TEXT NOT NULL,
                severity TEXT,
                title TEXT,
                description TEXT,
                latitude REAL,
                longitude REAL,
                source TEXT,
                metadata TEXT,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_vessel_ts ON events(vessel_id, created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vessel_id INTEGER REFERENCES vessels(id),
                rule TEXT NOT NULL,
                zone TEXT,
                severity TEXT NOT NULL,
                message TEXT,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_alerts_dedup ON alerts(vessel_id, rule, zone, created_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS watchlist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mmsi TEXT,
                imo TEXT,
                reason TEXT,
                added_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS shipyards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                country TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sar_detections (
                id TEXT PRIMARY KEY,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                length_m REAL,
                width_m REAL,
                confidence REAL DEFAULT 0.8,
                source_file TEXT,
                matched_vessel_id INTEGER REFERENCES vessels(id),
                match_distance_km REAL,
                is_dark_vessel INTEGER DEFAULT 1
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sar_timestamp ON sar_detections(timestamp)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sar_dark ON sar_detections(is_dark_vessel)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sanctions (
                imo TEXT PRIMARY KEY,
                mmsi TEXT,
                name TEXT NOT NULL,
                former_names TEXT,
                flag TEXT,
                vessel_type TEXT,
                authorities TEXT,
                programs TEXT,
                source_id TEXT,
                first_seen INTEGER,
                last_seen INTEGER
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sanctions_mmsi ON sanctions(mmsi)",
            [],
        )?;

        Ok(())
    }

    fn vessel_id(conn: &Connection, mmsi: &str, now: i64) -> anyhow::Result<i64> {
        conn.execute(
            "INSERT INTO vessels (mmsi, last_updated) VALUES (?1, ?2)
             ON CONFLICT(mmsi) DO UPDATE SET last_updated = excluded.last_updated",
            params![mmsi, now],
        )?;
        let id: i64 = conn.query_row("SELECT id FROM vessels WHERE mmsi = ?1", [mmsi], |r| r.get(0))?;
        Ok(id)
    }

    pub async fn append(&self, position: &Position) -> anyhow::Result<()> {
        if !position.is_valid() {
            return Err(anyhow::anyhow!("refusing to append invalid position for {}", position.mmsi));
        }
        let conn = self.conn.lock().await;
        let now = position.timestamp.timestamp();
        let vessel_id = Self::vessel_id(&conn, &position.mmsi, now)?;

        conn.execute(
            "INSERT INTO positions (vessel_id, mmsi, lat, lon, timestamp, speed_knots, course_deg, heading_deg, nav_status_code, source_id, source_received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                vessel_id,
                position.mmsi,
                position.lat,
                position.lon,
                position.timestamp.timestamp(),
                position.speed_knots,
                position.course_deg,
                position.heading_deg,
                position.nav_status_code,
                position.source_id,
                position.source_received_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub async fn history(&self, mmsi: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> anyhow::Result<Vec<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT mmsi, lat, lon, timestamp, speed_knots, course_deg, heading_deg, nav_status_code, source_id, source_received_at
             FROM positions WHERE mmsi = ?1 AND timestamp BETWEEN ?2 AND ?3 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![mmsi, since.timestamp(), until.timestamp()], row_to_position)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub async fn last_position(&self, mmsi: &str) -> anyhow::Result<Option<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT mmsi, lat, lon, timestamp, speed_knots, course_deg, heading_deg, nav_status_code, source_id, source_received_at
             FROM positions WHERE mmsi = ?1 ORDER BY timestamp DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![mmsi])?;
        Ok(match rows.next()? {
            Some(row) => Some(row_to_position(row)?),
            None => None,
        })
    }

    pub async fn all_positions_in_box(&self, bbox: BoundingBox, since: DateTime<Utc>) -> anyhow::Result<Vec<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT mmsi, lat, lon, timestamp, speed_knots, course_deg, heading_deg, nav_status_code, source_id, source_received_at
             FROM positions WHERE lat BETWEEN ?1 AND ?2 AND lon BETWEEN ?3 AND ?4 AND timestamp >= ?5
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(
                params![bbox.lat_min, bbox.lat_max, bbox.lon_min, bbox.lon_max, since.timestamp()],
                row_to_position,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub async fn upsert_vessel(&self, info: &VesselInfo) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().timestamp();
        Self::vessel_id(&conn, &info.mmsi, now)?;
        conn.execute(
            "UPDATE vessels SET imo=?2, name=?3, callsign=?4, ship_type_code=?5, ship_type_text=?6,
             length_m=?7, width_m=?8, draught_m=?9, flag_state=?10, destination=?11, eta=?12, source_id=?13
             WHERE mmsi=?1",
            params![
                info.mmsi,
                info.imo,
                info.name,
                info.callsign,
                info.ship_type_code,
                info.ship_type_text,
                info.length_m,
                info.width_m,
                info.draught_m,
                info.flag_state,
                info.destination,
                info.eta,
                info.source_id,
            ],
        )?;
        Ok(())
    }

    pub async fn append_event(&self, mmsi: Option<&str>, event_type: &str, severity: &str, title: &str, description: &str, lat: Option<f64>, lon: Option<f64>, source: &str, metadata: &serde_json::Value) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let vessel_id = match mmsi {
            Some(m) => Some(Self::vessel_id(&conn, m, Utc::now().timestamp())?),
            None => None,
        };
        conn.execute(
            "INSERT INTO events (vessel_id, event_type, severity, title, description, latitude, longitude, source, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![vessel_id, event_type, severity, title, description, lat, lon, source, metadata.to_string(), Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub async fn append_alert(&self, mmsi: Option<&str>, rule: &str, zone: Option<&str>, severity: &str, message: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let vessel_id = match mmsi {
            Some(m) => Some(Self::vessel_id(&conn, m, Utc::now().timestamp())?),
            None => None,
        };
        conn.execute(
            "INSERT INTO alerts (vessel_id, rule, zone, severity, message, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![vessel_id, rule, zone, severity, message, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Duplicate suppression holds for the same (mmsi, rule, zone)
    /// within 6 h.
    pub async fn recent_duplicate_alert(&self, mmsi: &str, rule: &str, zone: Option<&str>) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let cutoff = (Utc::now() - chrono::Duration::hours(6)).timestamp();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts a JOIN vessels v ON a.vessel_id = v.id
             WHERE v.mmsi = ?1 AND a.rule = ?2 AND (a.zone = ?3 OR (a.zone IS NULL AND ?3 IS NULL)) AND a.created_at >= ?4",
            params![mmsi, rule, zone, cutoff],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub async fn append_sar(&self, detection: &SarDetection) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let matched_vessel_id = match &detection.matched_vessel {
            Some(mmsi) => Some(Self::vessel_id(&conn, mmsi, Utc::now().timestamp())?),
            None => None,
        };
        conn.execute(
            "INSERT OR REPLACE INTO sar_detections (id, latitude, longitude, timestamp, length_m, width_m, confidence, source_file, matched_vessel_id, match_distance_km, is_dark_vessel)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                detection.id,
                detection.lat,
                detection.lon,
                detection.timestamp.timestamp(),
                detection.length_m,
                detection.width_m,
                detection.confidence,
                detection.source_file,
                matched_vessel_id,
                detection.match_distance_km,
                detection.is_dark_vessel() as i32,
            ],
        )?;
        Ok(())
    }

    pub async fn sar_match_count(&self, mmsi: &str, since: DateTime<Utc>) -> anyhow::Result<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM sar_detections d JOIN vessels v ON d.matched_vessel_id = v.id
             WHERE v.mmsi = ?1 AND d.timestamp >= ?2",
            params![mmsi, since.timestamp()],
            |r| r.get(0),
        )
        .map_err(Into::into)
    }

    pub async fn sar_present_in_region(&self, bbox: BoundingBox, since: DateTime<Utc>) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sar_detections WHERE latitude BETWEEN ?1 AND ?2 AND longitude BETWEEN ?3 AND ?4 AND timestamp >= ?5",
            params![bbox.lat_min, bbox.lat_max, bbox.lon_min, bbox.lon_max, since.timestamp()],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub async fn sar_table_exists(&self) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='sar_detections'",
            [],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_position(row: &rusqlite::Row) -> rusqlite::Result<Position> {
    Ok(Position {
        mmsi: row.get(0)?,
        lat: row.get(1)?,
        lon: row.get(2)?,
        timestamp: DateTime::from_timestamp(row.get(3)?, 0).unwrap_or_else(Utc::now),
        speed_knots: row.get(4)?,
        course_deg: row.get(5)?,
        heading_deg: row.get(6)?,
        nav_status_code: row.get(7)?,
        source_id: row.get(8)?,
        source_received_at: DateTime::from_timestamp(row.get(9)?, 0).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mmsi: &str, secs_ago: i64) -> Position {
        Position {
            mmsi: mmsi.to_string(),
            lat: 31.0,
            lon: 121.0,
            timestamp: Utc::now() - chrono::Duration::seconds(secs_ago),
            speed_knots: Some(5.0),
            course_deg: None,
            heading_deg: None,
            nav_status_code: None,
            source_id: "test".to_string(),
            source_received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn last_position_is_the_most_recent_write() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = TrackStore::open(tmp.path().to_str().unwrap()).unwrap();
        store.append(&sample("636012345", 100)).await.unwrap();
        store.append(&sample("636012345", 10)).await.unwrap();

        let last = store.last_position("636012345").await.unwrap().unwrap();
        let all = store.history("636012345", Utc::now() - chrono::Duration::hours(1), Utc::now()).await.unwrap();
        assert!(all.iter().all(|p| p.timestamp <= last.timestamp));
    }

    #[tokio::test]
    async fn append_rejects_invalid_positions() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = TrackStore::open(tmp.path().to_str().unwrap()).unwrap();
        let mut bad = sample("636012345", 0);
        bad.lat = 0.0;
        bad.lon = 0.0;
        assert!(store.append(&bad).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_alert_suppressed_within_window() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = TrackStore::open(tmp.path().to_str().unwrap()).unwrap();
        store.append(&sample("636012345", 0)).await.unwrap();
        store.append_alert(Some("636012345"), "dark_period", None, "medium", "test").await.unwrap();
        assert!(store.recent_duplicate_alert("636012345", "dark_period", None).await.unwrap());
    }
}
