//! SQLite implementation of [`LifecycleStore`]

use std::str::FromStr;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::LifecycleStore;
use crate::conflict::{check_slot, SlotCheck};
use crate::types::{
    Booking, BookingStatus, Call, CallParticipant, CallSetting, CallStatus, DeviceInfo,
    ParticipantRole,
};
use crate::{Error, Result};

const BOOKING_COLUMNS: &str =
    "id, client_id, provider_id, starts_at, duration_minutes, status, created_at, updated_at";
const CALL_COLUMNS: &str =
    "id, booking_id, channel_name, status, started_at, ended_at, duration_secs";
const PARTICIPANT_COLUMNS: &str = "id, call_id, user_id, role, joined_at, left_at, audio_enabled, \
     video_enabled, screen_share_enabled, network_quality, duration_secs, device_label";

/// How many times get-or-create re-reads after losing an insert race
const OPEN_CALL_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct SqliteLifecycleStore {
    pool: SqlitePool,
}

impl SqliteLifecycleStore {
    /// Connect to `database_url` and apply the schema
    pub async fn new(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(StdDuration::from_secs(5))
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            });

        // Every connection to `:memory:` is a separate database
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;

        info!("✅ Lifecycle store ready at {}", database_url);
        Ok(store)
    }

    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/001_initial_schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn overlapping_in<'e, E>(
        executor: E,
        provider_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Booking>>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {} FROM bookings
             WHERE provider_id = ? AND status != 'CANCELLED'
               AND starts_at < ? AND ends_at > ?
             ORDER BY starts_at",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(provider_id)
            .bind(end)
            .bind(start)
            .fetch_all(executor)
            .await?;
        rows.iter().map(booking_from_row).collect()
    }

    async fn list_bookings_where(&self, column: &str, user_id: &str) -> Result<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE {} = ? ORDER BY starts_at",
            BOOKING_COLUMNS, column
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(booking_from_row).collect()
    }

    async fn get_participant(&self, call_id: &str, user_id: &str) -> Result<Option<CallParticipant>> {
        let sql = format!(
            "SELECT {} FROM call_participants WHERE call_id = ? AND user_id = ?",
            PARTICIPANT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(call_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(participant_from_row).transpose()
    }
}

#[async_trait]
impl LifecycleStore for SqliteLifecycleStore {
    async fn insert_booking_if_free(&self, booking: &Booking) -> Result<SlotCheck> {
        let candidate = booking.interval();
        let mut tx = self.pool.begin().await?;

        // Writing first takes the write lock up front; a read-then-write
        // transaction could fail to upgrade under WAL
        let inserted = sqlx::query(
            "INSERT INTO bookings (id, client_id, provider_id, starts_at, ends_at, duration_minutes,
                                   status, created_at, updated_at)
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM bookings
                 WHERE provider_id = ? AND status != 'CANCELLED' AND starts_at < ? AND ends_at > ?
             )",
        )
        .bind(&booking.id)
        .bind(&booking.client_id)
        .bind(&booking.provider_id)
        .bind(booking.starts_at)
        .bind(booking.ends_at())
        .bind(booking.duration_minutes)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .bind(&booking.provider_id)
        .bind(candidate.end)
        .bind(candidate.start)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let existing =
                Self::overlapping_in(&mut *tx, &booking.provider_id, candidate.start, candidate.end)
                    .await?;
            tx.rollback().await?;
            return match check_slot(&candidate, &existing, None) {
                SlotCheck::Available => Err(Error::internal(format!(
                    "insert of booking {} refused without a visible conflict",
                    booking.id
                ))),
                conflict => Ok(conflict),
            };
        }

        // Re-verify after the insert so a concurrent writer is caught either way
        let after =
            Self::overlapping_in(&mut *tx, &booking.provider_id, candidate.start, candidate.end)
                .await?;
        let check = check_slot(&candidate, &after, Some(&booking.id));
        if !check.is_available() {
            tx.rollback().await?;
            return Ok(check);
        }

        tx.commit().await?;
        debug!("Inserted booking {} for provider {}", booking.id, booking.provider_id);
        Ok(SlotCheck::Available)
    }

    async fn get_booking(&self, id: &str) -> Result<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE id = ?", BOOKING_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(booking_from_row).transpose()
    }

    async fn find_overlapping(
        &self,
        provider_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        Self::overlapping_in(&self.pool, provider_id, start, end).await
    }

    async fn list_bookings_as_client(&self, user_id: &str) -> Result<Vec<Booking>> {
        self.list_bookings_where("client_id", user_id).await
    }

    async fn list_bookings_as_provider(&self, user_id: &str) -> Result<Vec<Booking>> {
        self.list_bookings_where("provider_id", user_id).await
    }

    async fn transition_booking(
        &self,
        id: &str,
        from: BookingStatus,
        to: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(to.as_str())
                .bind(now)
                .bind(id)
                .bind(from.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_stale_scheduled(&self, ended_before: DateTime<Utc>) -> Result<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE status = 'SCHEDULED' AND ends_at < ? ORDER BY ends_at",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(ended_before)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(booking_from_row).collect()
    }

    async fn get_or_create_open_call(&self, candidate: &Call) -> Result<(Call, bool)> {
        for attempt in 1..=OPEN_CALL_ATTEMPTS {
            if let Some(call) = self.find_open_call(&candidate.booking_id).await? {
                return Ok((call, false));
            }

            let inserted = sqlx::query(
                "INSERT INTO calls (id, booking_id, channel_name, status, started_at, ended_at, duration_secs)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&candidate.id)
            .bind(&candidate.booking_id)
            .bind(&candidate.channel_name)
            .bind(candidate.status.as_str())
            .bind(candidate.started_at)
            .bind(candidate.ended_at)
            .bind(candidate.duration_secs)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => return Ok((candidate.clone(), true)),
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    debug!(
                        "Open call for booking {} created concurrently (attempt {})",
                        candidate.booking_id, attempt
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::internal(format!(
            "could not resolve open call for booking {}",
            candidate.booking_id
        )))
    }

    async fn get_call(&self, id: &str) -> Result<Option<Call>> {
        let sql = format!("SELECT {} FROM calls WHERE id = ?", CALL_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(call_from_row).transpose()
    }

    async fn find_open_call(&self, booking_id: &str) -> Result<Option<Call>> {
        let sql = format!(
            "SELECT {} FROM calls WHERE booking_id = ? AND status IN ('SCHEDULED', 'IN_PROGRESS')",
            CALL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(call_from_row).transpose()
    }

    async fn latest_call(&self, booking_id: &str) -> Result<Option<Call>> {
        let sql = format!(
            "SELECT {} FROM calls WHERE booking_id = ? ORDER BY started_at DESC LIMIT 1",
            CALL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(call_from_row).transpose()
    }

    async fn complete_call(
        &self,
        call_id: &str,
        ended_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE calls SET status = 'COMPLETED', ended_at = ?, duration_secs = ?
             WHERE id = ? AND status != 'COMPLETED'",
        )
        .bind(ended_at)
        .bind(duration_secs)
        .bind(call_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_call_if_empty(&self, call_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM calls WHERE id = ?
             AND NOT EXISTS (SELECT 1 FROM call_participants WHERE call_id = ?)",
        )
        .bind(call_id)
        .bind(call_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_empty_open_calls(&self, started_before: DateTime<Utc>) -> Result<Vec<Call>> {
        let sql = format!(
            "SELECT {} FROM calls c
             WHERE c.status IN ('SCHEDULED', 'IN_PROGRESS') AND c.started_at < ?
               AND NOT EXISTS (SELECT 1 FROM call_participants p WHERE p.call_id = c.id)",
            CALL_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(started_before)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(call_from_row).collect()
    }

    async fn upsert_participant_join(
        &self,
        call_id: &str,
        user_id: &str,
        role: ParticipantRole,
        device: &DeviceInfo,
        now: DateTime<Utc>,
    ) -> Result<CallParticipant> {
        sqlx::query(
            "INSERT INTO call_participants (id, call_id, user_id, role, joined_at, left_at,
                                            audio_enabled, video_enabled, screen_share_enabled,
                                            device_label)
             VALUES (?, ?, ?, ?, ?, NULL, ?, ?, 0, ?)
             ON CONFLICT (call_id, user_id) DO UPDATE SET
                 joined_at = excluded.joined_at,
                 left_at = NULL,
                 audio_enabled = excluded.audio_enabled,
                 video_enabled = excluded.video_enabled,
                 screen_share_enabled = 0,
                 device_label = COALESCE(excluded.device_label, call_participants.device_label)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(call_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(now)
        .bind(device.audio_enabled)
        .bind(device.video_enabled)
        .bind(&device.label)
        .execute(&self.pool)
        .await?;

        self.get_participant(call_id, user_id)
            .await?
            .ok_or_else(|| Error::internal(format!("participant {} vanished after upsert", user_id)))
    }

    async fn mark_participant_left(
        &self,
        call_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CallParticipant>> {
        let mut participant = match self.get_participant(call_id, user_id).await? {
            Some(p) if p.is_present() => p,
            _ => return Ok(None),
        };

        let duration_secs = (now - participant.joined_at).num_seconds().max(0);
        let result = sqlx::query(
            "UPDATE call_participants SET left_at = ?, duration_secs = ?
             WHERE id = ? AND left_at IS NULL",
        )
        .bind(now)
        .bind(duration_secs)
        .bind(&participant.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        participant.left_at = Some(now);
        participant.duration_secs = Some(duration_secs);
        Ok(Some(participant))
    }

    async fn count_present_participants(&self, call_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS present FROM call_participants WHERE call_id = ? AND left_at IS NULL",
        )
        .bind(call_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("present")?)
    }

    async fn update_participant_setting(
        &self,
        call_id: &str,
        user_id: &str,
        setting: CallSetting,
        enabled: bool,
    ) -> Result<bool> {
        // Column name comes from a closed enum, never from input
        let sql = format!(
            "UPDATE call_participants SET {} = ? WHERE call_id = ? AND user_id = ? AND left_at IS NULL",
            setting.column()
        );
        let result = sqlx::query(&sql)
            .bind(enabled)
            .bind(call_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_network_quality(&self, call_id: &str, user_id: &str, score: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE call_participants SET network_quality = ?
             WHERE call_id = ? AND user_id = ? AND left_at IS NULL",
        )
        .bind(score)
        .bind(call_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_participants(&self, call_id: &str) -> Result<Vec<CallParticipant>> {
        let sql = format!(
            "SELECT {} FROM call_participants WHERE call_id = ? ORDER BY joined_at",
            PARTICIPANT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(call_id).fetch_all(&self.pool).await?;
        rows.iter().map(participant_from_row).collect()
    }
}

fn booking_from_row(row: &SqliteRow) -> Result<Booking> {
    let status: String = row.try_get("status")?;
    Ok(Booking {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        provider_id: row.try_get("provider_id")?,
        starts_at: row.try_get("starts_at")?,
        duration_minutes: row.try_get("duration_minutes")?,
        status: BookingStatus::from_str(&status)
            .ok_or_else(|| Error::internal(format!("unknown booking status {}", status)))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn call_from_row(row: &SqliteRow) -> Result<Call> {
    let status: String = row.try_get("status")?;
    Ok(Call {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        channel_name: row.try_get("channel_name")?,
        status: CallStatus::from_str(&status)
            .ok_or_else(|| Error::internal(format!("unknown call status {}", status)))?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        duration_secs: row.try_get("duration_secs")?,
    })
}

fn participant_from_row(row: &SqliteRow) -> Result<CallParticipant> {
    let role: String = row.try_get("role")?;
    Ok(CallParticipant {
        id: row.try_get("id")?,
        call_id: row.try_get("call_id")?,
        user_id: row.try_get("user_id")?,
        role: ParticipantRole::from_str(&role)
            .ok_or_else(|| Error::internal(format!("unknown participant role {}", role)))?,
        joined_at: row.try_get("joined_at")?,
        left_at: row.try_get("left_at")?,
        audio_enabled: row.try_get("audio_enabled")?,
        video_enabled: row.try_get("video_enabled")?,
        screen_share_enabled: row.try_get("screen_share_enabled")?,
        network_quality: row.try_get("network_quality")?,
        duration_secs: row.try_get("duration_secs")?,
        device_label: row.try_get("device_label")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn booking(id: &str, provider: &str, start: DateTime<Utc>, minutes: i64) -> Booking {
        Booking {
            id: id.to_string(),
            client_id: "client".to_string(),
            provider_id: provider.to_string(),
            starts_at: start,
            duration_minutes: minutes,
            status: BookingStatus::Scheduled,
            created_at: at(8, 0),
            updated_at: at(8, 0),
        }
    }

    #[tokio::test]
    async fn test_insert_and_conflict() {
        let store = SqliteLifecycleStore::new_in_memory().await.unwrap();
        let first = booking("b1", "p", at(10, 0), 30);
        assert!(store.insert_booking_if_free(&first).await.unwrap().is_available());

        let overlapping = booking("b2", "p", at(10, 15), 30);
        assert_eq!(
            store.insert_booking_if_free(&overlapping).await.unwrap(),
            SlotCheck::Conflict {
                booking_id: "b1".to_string()
            }
        );
        assert!(store.get_booking("b2").await.unwrap().is_none());

        let adjacent = booking("b3", "p", at(10, 30), 30);
        assert!(store.insert_booking_if_free(&adjacent).await.unwrap().is_available());

        let other_provider = booking("b4", "q", at(10, 0), 30);
        assert!(store.insert_booking_if_free(&other_provider).await.unwrap().is_available());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let store = SqliteLifecycleStore::new_in_memory().await.unwrap();
        let original = booking("b1", "p", at(10, 0), 45);
        store.insert_booking_if_free(&original).await.unwrap();
        assert_eq!(store.get_booking("b1").await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = SqliteLifecycleStore::new_in_memory().await.unwrap();
        store
            .insert_booking_if_free(&booking("b1", "p", at(10, 0), 30))
            .await
            .unwrap();

        let moved = store
            .transition_booking("b1", BookingStatus::Scheduled, BookingStatus::InProgress, at(9, 58))
            .await
            .unwrap();
        assert!(moved);

        let stale = store
            .transition_booking("b1", BookingStatus::Scheduled, BookingStatus::Cancelled, at(9, 59))
            .await
            .unwrap();
        assert!(!stale);
        assert_eq!(
            store.get_booking("b1").await.unwrap().unwrap().status,
            BookingStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_single_open_call_per_booking() {
        let store = SqliteLifecycleStore::new_in_memory().await.unwrap();
        store
            .insert_booking_if_free(&booking("b1", "p", at(10, 0), 30))
            .await
            .unwrap();

        let (first, created) = store
            .get_or_create_open_call(&Call::open_for("b1", at(9, 56)))
            .await
            .unwrap();
        assert!(created);

        let (second, created) = store
            .get_or_create_open_call(&Call::open_for("b1", at(9, 57)))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_participant_rejoin_reuses_row() {
        let store = SqliteLifecycleStore::new_in_memory().await.unwrap();
        store
            .insert_booking_if_free(&booking("b1", "p", at(10, 0), 30))
            .await
            .unwrap();
        let (call, _) = store
            .get_or_create_open_call(&Call::open_for("b1", at(9, 56)))
            .await
            .unwrap();

        let joined = store
            .upsert_participant_join(&call.id, "p", ParticipantRole::Provider, &DeviceInfo::default(), at(9, 56))
            .await
            .unwrap();
        let left = store
            .mark_participant_left(&call.id, "p", at(9, 56) + Duration::seconds(90))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(left.duration_secs, Some(90));
        assert!(store
            .mark_participant_left(&call.id, "p", at(9, 59))
            .await
            .unwrap()
            .is_none());

        let rejoined = store
            .upsert_participant_join(&call.id, "p", ParticipantRole::Provider, &DeviceInfo::default(), at(10, 0))
            .await
            .unwrap();
        assert_eq!(rejoined.id, joined.id);
        assert!(rejoined.is_present());
        assert_eq!(store.list_participants(&call.id).await.unwrap().len(), 1);
        assert_eq!(store.count_present_participants(&call.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_settings_only_touch_present_rows() {
        let store = SqliteLifecycleStore::new_in_memory().await.unwrap();
        store
            .insert_booking_if_free(&booking("b1", "p", at(10, 0), 30))
            .await
            .unwrap();
        let (call, _) = store
            .get_or_create_open_call(&Call::open_for("b1", at(9, 56)))
            .await
            .unwrap();
        store
            .upsert_participant_join(&call.id, "client", ParticipantRole::Client, &DeviceInfo::default(), at(9, 56))
            .await
            .unwrap();

        assert!(store
            .update_participant_setting(&call.id, "client", CallSetting::ScreenShare, true)
            .await
            .unwrap());
        assert!(store.update_network_quality(&call.id, "client", 4).await.unwrap());

        let row = &store.list_participants(&call.id).await.unwrap()[0];
        assert!(row.screen_share_enabled);
        assert_eq!(row.network_quality, Some(4));

        store
            .mark_participant_left(&call.id, "client", at(10, 5))
            .await
            .unwrap();
        assert!(!store
            .update_participant_setting(&call.id, "client", CallSetting::Audio, false)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_empty_call_cleanup() {
        let store = SqliteLifecycleStore::new_in_memory().await.unwrap();
        store
            .insert_booking_if_free(&booking("b1", "p", at(10, 0), 30))
            .await
            .unwrap();
        let (call, _) = store
            .get_or_create_open_call(&Call::open_for("b1", at(9, 56)))
            .await
            .unwrap();

        let orphans = store.list_empty_open_calls(at(9, 58)).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert!(store.delete_call_if_empty(&call.id).await.unwrap());
        assert!(store.find_open_call("b1").await.unwrap().is_none());
    }
}
