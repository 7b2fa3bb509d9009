//! Change Notification Queue
//!
//! Durable hand-off of "something changed" events from writers to the
//! single maintenance consumer. Records are delivered by ascending enqueue
//! time, ties broken by ascending record number, and removed as they are
//! read: delivery is at-most-once.

use crate::error::{DependsError, DependsResult, StorageContext};
use crate::store::Store;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Kind of mutation a notification reports
///
/// Stored as a single character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A time series was created (target: ts key)
    TsCreated,
    /// A time series was deleted (target: ts key)
    TsDeleted,
    /// A time series was modified (target: ts key)
    TsModified,
    /// A computation was created, edited or deleted (target: computation id)
    CompModified,
    /// A group definition changed (target: group id)
    GroupModified,
    /// Rebuild the whole index (target ignored)
    FullEval,
    /// A time series changed its storage code (target: ts key)
    TsCodeChanged,
    /// A code this version does not know
    Unknown(char),
}

impl EventType {
    pub fn code(self) -> char {
        match self {
            EventType::TsCreated => 'T',
            EventType::TsDeleted => 'D',
            EventType::TsModified => 'M',
            EventType::CompModified => 'C',
            EventType::GroupModified => 'G',
            EventType::FullEval => 'F',
            EventType::TsCodeChanged => 'S',
            EventType::Unknown(c) => c,
        }
    }

    pub fn from_code(code: char) -> Self {
        match code {
            'T' => EventType::TsCreated,
            'D' => EventType::TsDeleted,
            'M' => EventType::TsModified,
            'C' => EventType::CompModified,
            'G' => EventType::GroupModified,
            'F' => EventType::FullEval,
            'S' => EventType::TsCodeChanged,
            other => EventType::Unknown(other),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::TsCreated => write!(f, "ts-created"),
            EventType::TsDeleted => write!(f, "ts-deleted"),
            EventType::TsModified => write!(f, "ts-modified"),
            EventType::CompModified => write!(f, "comp-modified"),
            EventType::GroupModified => write!(f, "group-modified"),
            EventType::FullEval => write!(f, "full-eval"),
            EventType::TsCodeChanged => write!(f, "ts-code-changed"),
            EventType::Unknown(c) => write!(f, "unknown({})", c),
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    /// Accepts the display name or the one-character code
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return match EventType::from_code(c.to_ascii_uppercase()) {
                EventType::Unknown(_) => Err(format!("Unknown event code: {}", c)),
                event => Ok(event),
            };
        }

        match s.to_lowercase().as_str() {
            "ts-created" => Ok(EventType::TsCreated),
            "ts-deleted" => Ok(EventType::TsDeleted),
            "ts-modified" => Ok(EventType::TsModified),
            "comp-modified" => Ok(EventType::CompModified),
            "group-modified" => Ok(EventType::GroupModified),
            "full-eval" => Ok(EventType::FullEval),
            "ts-code-changed" => Ok(EventType::TsCodeChanged),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// One queued record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub record_id: i64,
    pub event_type: EventType,
    pub target_key: i64,
    pub enqueued_at: DateTime<Utc>,
}

impl fmt::Display for ChangeNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} at {}",
            self.record_id,
            self.event_type,
            self.target_key,
            self.enqueued_at.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )
    }
}

fn millis_to_time(millis: i64) -> DependsResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| DependsError::Corruption(format!("notification time {} out of range", millis)))
}

type RawRecord = (i64, String, i64, i64);

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode((record_id, code, target_key, millis): RawRecord) -> DependsResult<ChangeNotification> {
    let event_type = code
        .chars()
        .next()
        .map(EventType::from_code)
        .ok_or_else(|| DependsError::Corruption(format!("notification {} has no event type", record_id)))?;

    Ok(ChangeNotification {
        record_id,
        event_type,
        target_key,
        enqueued_at: millis_to_time(millis)?,
    })
}

const SELECT_ORDERED: &str = "SELECT record_num, event_type, key, date_time_loaded
                              FROM cp_depends_notify
                              ORDER BY date_time_loaded, record_num";

/// Queue stored in `cp_depends_notify`
#[derive(Debug, Clone)]
pub struct NotifyQueue {
    store: Arc<Store>,
}

impl NotifyQueue {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Append an event stamped with the current time
    pub fn enqueue(&self, event_type: EventType, target_key: i64) -> DependsResult<ChangeNotification> {
        self.enqueue_at(event_type, target_key, Utc::now())
    }

    /// Append an event with an explicit timestamp
    pub fn enqueue_at(
        &self,
        event_type: EventType,
        target_key: i64,
        at: DateTime<Utc>,
    ) -> DependsResult<ChangeNotification> {
        self.store
            .transaction(|tx| Self::enqueue_in(tx, event_type, target_key, at))
    }

    /// Append an event inside the caller's transaction
    ///
    /// The record only becomes visible if the caller commits.
    pub fn enqueue_in(
        conn: &Connection,
        event_type: EventType,
        target_key: i64,
        at: DateTime<Utc>,
    ) -> DependsResult<ChangeNotification> {
        let millis = at.timestamp_millis();
        conn.execute(
            "INSERT INTO cp_depends_notify (event_type, key, date_time_loaded) VALUES (?, ?, ?)",
            params![event_type.code().to_string(), target_key, millis],
        )
        .during("enqueue notification", format!("{} {}", event_type, target_key))?;

        let record = ChangeNotification {
            record_id: conn.last_insert_rowid(),
            event_type,
            target_key,
            enqueued_at: millis_to_time(millis)?,
        };
        tracing::trace!("Enqueued {}", record);
        Ok(record)
    }

    /// Pop the earliest record, if any
    pub fn dequeue_oldest(&self) -> DependsResult<Option<ChangeNotification>> {
        let raw = self.store.transaction(|tx| {
            let raw = tx
                .query_row(&format!("{} LIMIT 1", SELECT_ORDERED), [], raw_from_row)
                .optional()
                .during("read oldest notification", "cp_depends_notify")?;

            if let Some((record_id, ..)) = &raw {
                tx.execute(
                    "DELETE FROM cp_depends_notify WHERE record_num = ?",
                    params![record_id],
                )
                .during("delete notification", format!("record {}", record_id))?;
            }
            Ok(raw)
        })?;

        raw.map(decode).transpose()
    }

    /// Snapshot of the whole queue in delivery order; diagnostics only
    pub fn peek_all(&self) -> DependsResult<Vec<ChangeNotification>> {
        let raws = self.store.read(|conn| {
            let mut stmt = conn
                .prepare(SELECT_ORDERED)
                .during("prepare queue scan", "cp_depends_notify")?;
            let rows = stmt
                .query_map([], raw_from_row)
                .during("scan queue", "cp_depends_notify")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .during("scan queue", "cp_depends_notify")
        })?;

        raws.into_iter().map(decode).collect()
    }

    /// Remove a record; returns false if it was already gone
    pub fn delete(&self, record: &ChangeNotification) -> DependsResult<bool> {
        self.delete_by_id(record.record_id)
    }

    pub fn delete_by_id(&self, record_id: i64) -> DependsResult<bool> {
        let deleted = self.store.transaction(|tx| {
            tx.execute(
                "DELETE FROM cp_depends_notify WHERE record_num = ?",
                params![record_id],
            )
            .during("delete notification", format!("record {}", record_id))
        })?;
        Ok(deleted > 0)
    }

    pub fn len(&self) -> DependsResult<u64> {
        let n: i64 = self.store.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cp_depends_notify", [], |row| row.get(0))
                .during("count notifications", "cp_depends_notify")
        })?;
        Ok(n as u64)
    }

    pub fn is_empty(&self) -> DependsResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> NotifyQueue {
        NotifyQueue::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn test_event_codes() {
        for event in [
            EventType::TsCreated,
            EventType::TsDeleted,
            EventType::TsModified,
            EventType::CompModified,
            EventType::GroupModified,
            EventType::FullEval,
            EventType::TsCodeChanged,
        ] {
            assert_eq!(EventType::from_code(event.code()), event);
            assert_eq!(event.to_string().parse::<EventType>().unwrap(), event);
        }
        assert_eq!(EventType::from_code('Z'), EventType::Unknown('Z'));
        assert_eq!("c".parse::<EventType>().unwrap(), EventType::CompModified);
        assert!("sideways".parse::<EventType>().is_err());
        assert!("x".parse::<EventType>().is_err());
        assert!("Z".parse::<EventType>().is_err());
    }

    #[test]
    fn test_oldest_timestamp_first() {
        let q = queue();
        let e1 = q.enqueue_at(EventType::TsCreated, 1, at(100)).unwrap();
        let e2 = q.enqueue_at(EventType::TsCreated, 2, at(50)).unwrap();

        assert_eq!(q.dequeue_oldest().unwrap(), Some(e2));
        assert_eq!(q.dequeue_oldest().unwrap(), Some(e1));
        assert_eq!(q.dequeue_oldest().unwrap(), None);
    }

    #[test]
    fn test_ties_by_record_number() {
        let q = queue();
        let first = q.enqueue_at(EventType::CompModified, 7, at(100)).unwrap();
        let second = q.enqueue_at(EventType::CompModified, 8, at(100)).unwrap();
        assert!(first.record_id < second.record_id);

        assert_eq!(q.dequeue_oldest().unwrap().unwrap().target_key, 7);
        assert_eq!(q.dequeue_oldest().unwrap().unwrap().target_key, 8);
    }

    #[test]
    fn test_pop_removes_record() {
        let q = queue();
        q.enqueue_at(EventType::TsDeleted, 3, at(10)).unwrap();
        q.enqueue_at(EventType::TsDeleted, 4, at(20)).unwrap();

        let popped = q.dequeue_oldest().unwrap().unwrap();
        let remaining = q.peek_all().unwrap();
        assert!(!remaining.contains(&popped));
        assert_eq!(remaining.len(), 1);
        assert_eq!(q.len().unwrap(), 1);
    }

    #[test]
    fn test_peek_is_not_destructive() {
        let q = queue();
        q.enqueue(EventType::FullEval, 0).unwrap();

        assert_eq!(q.peek_all().unwrap().len(), 1);
        assert_eq!(q.peek_all().unwrap().len(), 1);
        assert!(!q.is_empty().unwrap());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let q = queue();
        let record = q.enqueue(EventType::GroupModified, 5).unwrap();

        assert!(q.delete(&record).unwrap());
        assert!(!q.delete(&record).unwrap());
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn test_enqueue_in_follows_writer_transaction() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let q = NotifyQueue::new(store.clone());

        let res: DependsResult<()> = store.transaction(|tx| {
            NotifyQueue::enqueue_in(tx, EventType::CompModified, 1, Utc::now())?;
            Err(DependsError::Corruption("writer failed".to_string()))
        });
        assert!(res.is_err());
        assert!(q.is_empty().unwrap());

        store
            .transaction(|tx| NotifyQueue::enqueue_in(tx, EventType::CompModified, 1, Utc::now()))
            .unwrap();
        assert_eq!(q.len().unwrap(), 1);
    }

    #[test]
    fn test_unknown_code_is_delivered() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .read(|conn| {
                conn.execute(
                    "INSERT INTO cp_depends_notify (event_type, key, date_time_loaded) VALUES ('X', 9, 1)",
                    [],
                )
                .during("insert", "test")
            })
            .unwrap();

        let q = NotifyQueue::new(store);
        let record = q.dequeue_oldest().unwrap().unwrap();
        assert_eq!(record.event_type, EventType::Unknown('X'));
        assert_eq!(record.target_key, 9);
    }
}
