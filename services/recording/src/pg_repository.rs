use crate::config::DatabaseConfig;
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::RepositoryError;
use crate::models::{
    AccessLog, Consent, DeviceInfo, GeoPoint, Recording, RecordingSettings, RecordingStats,
    RecordingStatus, RetentionPolicy, UnknownVariant,
};
use crate::repository::{CompletedUpload, RecordingRepository, RepositoryResult, UploadProgress};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

const RECORDING_COLUMNS: &str = r#"
    id, ride_id, user_id, user_role, recording_type, status, retention_policy,
    file_url, thumbnail_url, file_size_bytes, duration_seconds, format, quality,
    encrypted, encryption_key_id, upload_id, chunks_received, chunks_total,
    started_at, ended_at, uploaded_at, processed_at, expires_at,
    device_info, start_location, end_location, version, created_at, updated_at
"#;

const CONSENT_COLUMNS: &str =
    "id, ride_id, user_id, user_role, consented, consented_at, ip_address, user_agent";

const SETTINGS_COLUMNS: &str = r#"
    user_id, auto_record, default_recording_type, default_quality,
    notify_on_recording, default_retention_policy, updated_at
"#;

/// Recording row as stored; enums are kept as text
#[derive(Debug, FromRow)]
struct RecordingRow {
    id: Uuid,
    ride_id: Uuid,
    user_id: Uuid,
    user_role: String,
    recording_type: String,
    status: String,
    retention_policy: String,
    file_url: Option<String>,
    thumbnail_url: Option<String>,
    file_size_bytes: Option<i64>,
    duration_seconds: Option<i32>,
    format: Option<String>,
    quality: String,
    encrypted: bool,
    encryption_key_id: Option<String>,
    upload_id: Option<String>,
    chunks_received: i32,
    chunks_total: Option<i32>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    uploaded_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    device_info: Option<Json<DeviceInfo>>,
    start_location: Option<Json<GeoPoint>>,
    end_location: Option<Json<GeoPoint>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ConsentRow {
    id: Uuid,
    ride_id: Uuid,
    user_id: Uuid,
    user_role: String,
    consented: bool,
    consented_at: DateTime<Utc>,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

#[derive(Debug, FromRow)]
struct AccessLogRow {
    id: Uuid,
    recording_id: Uuid,
    accessed_by: Uuid,
    access_type: String,
    reason: Option<String>,
    accessed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct SettingsRow {
    user_id: Uuid,
    auto_record: bool,
    default_recording_type: String,
    default_quality: String,
    notify_on_recording: bool,
    default_retention_policy: String,
    updated_at: DateTime<Utc>,
}

fn parse<T: FromStr<Err = UnknownVariant>>(value: &str) -> RepositoryResult<T> {
    value
        .parse()
        .map_err(|e: UnknownVariant| RepositoryError::InvalidData(e.to_string()))
}

impl TryFrom<RecordingRow> for Recording {
    type Error = RepositoryError;

    fn try_from(row: RecordingRow) -> Result<Self, Self::Error> {
        Ok(Recording {
            id: row.id,
            ride_id: row.ride_id,
            user_id: row.user_id,
            user_role: parse(&row.user_role)?,
            recording_type: parse(&row.recording_type)?,
            status: parse(&row.status)?,
            retention_policy: parse(&row.retention_policy)?,
            file_url: row.file_url,
            thumbnail_url: row.thumbnail_url,
            file_size_bytes: row.file_size_bytes,
            duration_seconds: row.duration_seconds,
            format: row.format,
            quality: row.quality,
            encrypted: row.encrypted,
            encryption_key_id: row.encryption_key_id,
            upload_id: row.upload_id,
            chunks_received: row.chunks_received,
            chunks_total: row.chunks_total,
            started_at: row.started_at,
            ended_at: row.ended_at,
            uploaded_at: row.uploaded_at,
            processed_at: row.processed_at,
            expires_at: row.expires_at,
            device_info: row.device_info.map(|Json(info)| info),
            start_location: row.start_location.map(|Json(point)| point),
            end_location: row.end_location.map(|Json(point)| point),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<ConsentRow> for Consent {
    type Error = RepositoryError;

    fn try_from(row: ConsentRow) -> Result<Self, Self::Error> {
        Ok(Consent {
            id: row.id,
            ride_id: row.ride_id,
            user_id: row.user_id,
            user_role: parse(&row.user_role)?,
            consented: row.consented,
            consented_at: row.consented_at,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
        })
    }
}

impl TryFrom<AccessLogRow> for AccessLog {
    type Error = RepositoryError;

    fn try_from(row: AccessLogRow) -> Result<Self, Self::Error> {
        Ok(AccessLog {
            id: row.id,
            recording_id: row.recording_id,
            accessed_by: row.accessed_by,
            access_type: parse(&row.access_type)?,
            reason: row.reason,
            accessed_at: row.accessed_at,
        })
    }
}

impl TryFrom<SettingsRow> for RecordingSettings {
    type Error = RepositoryError;

    fn try_from(row: SettingsRow) -> Result<Self, Self::Error> {
        Ok(RecordingSettings {
            user_id: row.user_id,
            auto_record: row.auto_record,
            default_recording_type: parse(&row.default_recording_type)?,
            default_quality: row.default_quality,
            notify_on_recording: row.notify_on_recording,
            default_retention_policy: parse(&row.default_retention_policy)?,
            updated_at: Some(row.updated_at),
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> RepositoryResult<Vec<T>>
where
    T: TryFrom<R, Error = RepositoryError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn status_list(statuses: &[RecordingStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// The partial unique index on (ride_id, user_id) backs the one-active-recording rule
fn map_insert_error(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => RepositoryError::Conflict(
            "an active recording already exists for this ride".to_string(),
        ),
        other => RepositoryError::Database(other),
    }
}

/// PostgreSQL-backed recording repository
pub struct PgRecordingRepository {
    pool: PgPool,
}

impl PgRecordingRepository {
    /// Create a new repository with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Resolve a versioned update that may have matched no row
    async fn finish_update(
        &self,
        id: Uuid,
        row: Option<RecordingRow>,
    ) -> RepositoryResult<Recording> {
        if let Some(row) = row {
            return row.try_into();
        }

        let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM recordings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match current {
            Some((version,)) => {
                debug!(recording_id = %id, current_version = version, "Stale recording update");
                Err(RepositoryError::VersionMismatch(id))
            }
            None => Err(RepositoryError::NotFound("recording")),
        }
    }
}

#[async_trait]
impl RecordingRepository for PgRecordingRepository {
    #[instrument(skip(self, recording), fields(recording_id = %recording.id, ride_id = %recording.ride_id))]
    async fn create_recording(&self, recording: &Recording) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO recordings (
                id, ride_id, user_id, user_role, recording_type, status, retention_policy,
                file_url, thumbnail_url, file_size_bytes, duration_seconds, format, quality,
                encrypted, encryption_key_id, upload_id, chunks_received, chunks_total,
                started_at, ended_at, uploaded_at, processed_at, expires_at,
                device_info, start_location, end_location, version, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18,
                $19, $20, $21, $22, $23,
                $24, $25, $26, $27, $28, $29
            )
            "#,
        )
        .bind(recording.id)
        .bind(recording.ride_id)
        .bind(recording.user_id)
        .bind(recording.user_role.as_str())
        .bind(recording.recording_type.as_str())
        .bind(recording.status.as_str())
        .bind(recording.retention_policy.as_str())
        .bind(&recording.file_url)
        .bind(&recording.thumbnail_url)
        .bind(recording.file_size_bytes)
        .bind(recording.duration_seconds)
        .bind(&recording.format)
        .bind(&recording.quality)
        .bind(recording.encrypted)
        .bind(&recording.encryption_key_id)
        .bind(&recording.upload_id)
        .bind(recording.chunks_received)
        .bind(recording.chunks_total)
        .bind(recording.started_at)
        .bind(recording.ended_at)
        .bind(recording.uploaded_at)
        .bind(recording.processed_at)
        .bind(recording.expires_at)
        .bind(recording.device_info.as_ref().map(Json))
        .bind(recording.start_location.map(Json))
        .bind(recording.end_location.map(Json))
        .bind(recording.version)
        .bind(recording.created_at)
        .bind(recording.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        debug!("Recording row created");
        Ok(())
    }

    async fn get_recording(&self, id: Uuid) -> RepositoryResult<Recording> {
        let sql = format!("SELECT {RECORDING_COLUMNS} FROM recordings WHERE id = $1");
        let row = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(RepositoryError::NotFound("recording"))?.try_into()
    }

    async fn get_active_recording(
        &self,
        ride_id: Uuid,
        user_id: Uuid,
    ) -> RepositoryResult<Option<Recording>> {
        let sql = format!(
            r#"
            SELECT {RECORDING_COLUMNS} FROM recordings
            WHERE ride_id = $1 AND user_id = $2
              AND status NOT IN ('completed', 'failed', 'deleted')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(ride_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Recording::try_from).transpose()
    }

    async fn list_recordings_for_ride(&self, ride_id: Uuid) -> RepositoryResult<Vec<Recording>> {
        let sql = format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings WHERE ride_id = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(ride_id)
            .fetch_all(&self.pool)
            .await?;

        collect(rows)
    }

    async fn list_recordings_by_status(
        &self,
        statuses: &[RecordingStatus],
        limit: i64,
    ) -> RepositoryResult<Vec<Recording>> {
        let sql = format!(
            r#"
            SELECT {RECORDING_COLUMNS} FROM recordings
            WHERE status = ANY($1)
            ORDER BY updated_at ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(status_list(statuses))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        collect(rows)
    }

    #[instrument(skip(self))]
    async fn update_recording_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: RecordingStatus,
    ) -> RepositoryResult<Recording> {
        let sql = format!(
            r#"
            UPDATE recordings
            SET status = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {RECORDING_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?;

        self.finish_update(id, row).await
    }

    #[instrument(skip(self))]
    async fn update_recording_stopped(
        &self,
        id: Uuid,
        expected_version: i64,
        ended_at: DateTime<Utc>,
        duration_seconds: i32,
        end_location: Option<GeoPoint>,
    ) -> RepositoryResult<Recording> {
        let sql = format!(
            r#"
            UPDATE recordings
            SET status = 'stopped', ended_at = $3, duration_seconds = $4,
                end_location = COALESCE($5, end_location),
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {RECORDING_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(ended_at)
            .bind(duration_seconds)
            .bind(end_location.map(Json))
            .fetch_optional(&self.pool)
            .await?;

        self.finish_update(id, row).await
    }

    #[instrument(skip(self, progress))]
    async fn update_recording_upload(
        &self,
        id: Uuid,
        expected_version: i64,
        progress: &UploadProgress,
    ) -> RepositoryResult<Recording> {
        let sql = format!(
            r#"
            UPDATE recordings
            SET status = 'uploading', upload_id = $3, chunks_received = $4, chunks_total = $5,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {RECORDING_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(&progress.upload_id)
            .bind(progress.chunks_received)
            .bind(progress.chunks_total)
            .fetch_optional(&self.pool)
            .await?;

        self.finish_update(id, row).await
    }

    #[instrument(skip(self, upload))]
    async fn update_recording_completed(
        &self,
        id: Uuid,
        expected_version: i64,
        upload: &CompletedUpload,
    ) -> RepositoryResult<Recording> {
        let sql = format!(
            r#"
            UPDATE recordings
            SET status = 'uploaded', file_url = $3, file_size_bytes = $4,
                duration_seconds = $5, uploaded_at = $6,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {RECORDING_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(&upload.file_url)
            .bind(upload.file_size_bytes)
            .bind(upload.duration_seconds)
            .bind(upload.uploaded_at)
            .fetch_optional(&self.pool)
            .await?;

        self.finish_update(id, row).await
    }

    #[instrument(skip(self))]
    async fn update_recording_processed(
        &self,
        id: Uuid,
        expected_version: i64,
        thumbnail_url: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> RepositoryResult<Recording> {
        let sql = format!(
            r#"
            UPDATE recordings
            SET status = 'completed', thumbnail_url = COALESCE($3, thumbnail_url),
                processed_at = $4, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {RECORDING_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(thumbnail_url)
            .bind(processed_at)
            .fetch_optional(&self.pool)
            .await?;

        self.finish_update(id, row).await
    }

    #[instrument(skip(self))]
    async fn update_retention_policy(
        &self,
        id: Uuid,
        expected_version: i64,
        policy: RetentionPolicy,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<Recording> {
        let sql = format!(
            r#"
            UPDATE recordings
            SET retention_policy = $3, expires_at = $4,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {RECORDING_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(policy.as_str())
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await?;

        self.finish_update(id, row).await
    }

    #[instrument(skip(self))]
    async fn mark_recording_deleted(
        &self,
        id: Uuid,
        expected_version: i64,
    ) -> RepositoryResult<Recording> {
        let sql = format!(
            r#"
            UPDATE recordings
            SET status = 'deleted', file_url = NULL,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {RECORDING_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(id)
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await?;

        self.finish_update(id, row).await
    }

    async fn get_expired_recordings(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Recording>> {
        let sql = format!(
            r#"
            SELECT {RECORDING_COLUMNS} FROM recordings
            WHERE expires_at < $1 AND status NOT IN ('deleted', 'failed')
            ORDER BY expires_at ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, RecordingRow>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        collect(rows)
    }

    #[instrument(skip(self, consent), fields(ride_id = %consent.ride_id, user_id = %consent.user_id))]
    async fn upsert_consent(&self, consent: &Consent) -> RepositoryResult<Consent> {
        let sql = format!(
            r#"
            INSERT INTO recording_consents (
                id, ride_id, user_id, user_role, consented, consented_at, ip_address, user_agent
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (ride_id, user_id) DO UPDATE SET
                user_role = EXCLUDED.user_role,
                consented = EXCLUDED.consented,
                consented_at = EXCLUDED.consented_at,
                ip_address = EXCLUDED.ip_address,
                user_agent = EXCLUDED.user_agent
            RETURNING {CONSENT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ConsentRow>(&sql)
            .bind(consent.id)
            .bind(consent.ride_id)
            .bind(consent.user_id)
            .bind(consent.user_role.as_str())
            .bind(consent.consented)
            .bind(consent.consented_at)
            .bind(&consent.ip_address)
            .bind(&consent.user_agent)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn list_consents(&self, ride_id: Uuid) -> RepositoryResult<Vec<Consent>> {
        let sql = format!(
            "SELECT {CONSENT_COLUMNS} FROM recording_consents WHERE ride_id = $1 ORDER BY consented_at ASC"
        );
        let rows = sqlx::query_as::<_, ConsentRow>(&sql)
            .bind(ride_id)
            .fetch_all(&self.pool)
            .await?;

        collect(rows)
    }

    async fn check_all_consented(&self, ride_id: Uuid) -> RepositoryResult<bool> {
        let (all_consented,): (bool,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) = 2 AND COALESCE(BOOL_AND(consented), FALSE)
            FROM recording_consents
            WHERE ride_id = $1
            "#,
        )
        .bind(ride_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(all_consented)
    }

    async fn create_access_log(&self, entry: &AccessLog) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO recording_access_logs (
                id, recording_id, accessed_by, access_type, reason, accessed_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.recording_id)
        .bind(entry.accessed_by)
        .bind(entry.access_type.as_str())
        .bind(&entry.reason)
        .bind(entry.accessed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_access_logs(&self, recording_id: Uuid) -> RepositoryResult<Vec<AccessLog>> {
        let rows = sqlx::query_as::<_, AccessLogRow>(
            r#"
            SELECT id, recording_id, accessed_by, access_type, reason, accessed_at
            FROM recording_access_logs
            WHERE recording_id = $1
            ORDER BY accessed_at DESC
            "#,
        )
        .bind(recording_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn get_settings(&self, user_id: Uuid) -> RepositoryResult<Option<RecordingSettings>> {
        let sql = format!("SELECT {SETTINGS_COLUMNS} FROM recording_settings WHERE user_id = $1");
        let row = sqlx::query_as::<_, SettingsRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(RecordingSettings::try_from).transpose()
    }

    async fn upsert_settings(
        &self,
        settings: &RecordingSettings,
    ) -> RepositoryResult<RecordingSettings> {
        let sql = format!(
            r#"
            INSERT INTO recording_settings (
                user_id, auto_record, default_recording_type, default_quality,
                notify_on_recording, default_retention_policy, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                auto_record = EXCLUDED.auto_record,
                default_recording_type = EXCLUDED.default_recording_type,
                default_quality = EXCLUDED.default_quality,
                notify_on_recording = EXCLUDED.notify_on_recording,
                default_retention_policy = EXCLUDED.default_retention_policy,
                updated_at = NOW()
            RETURNING {SETTINGS_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SettingsRow>(&sql)
            .bind(settings.user_id)
            .bind(settings.auto_record)
            .bind(settings.default_recording_type.as_str())
            .bind(&settings.default_quality)
            .bind(settings.notify_on_recording)
            .bind(settings.default_retention_policy.as_str())
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn get_recording_stats(&self, user_id: Option<Uuid>) -> RepositoryResult<RecordingStats> {
        let stats = sqlx::query_as::<_, RecordingStats>(
            r#"
            SELECT
                COUNT(*) AS total_recordings,
                COUNT(*) FILTER (WHERE status NOT IN ('completed', 'failed', 'deleted')) AS active_recordings,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed_recordings,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed_recordings,
                COUNT(*) FILTER (WHERE status = 'deleted') AS deleted_recordings,
                COUNT(*) FILTER (WHERE recording_type = 'audio') AS audio_recordings,
                COUNT(*) FILTER (WHERE recording_type = 'video') AS video_recordings,
                COALESCE(SUM(duration_seconds) FILTER (WHERE status <> 'deleted'), 0)::BIGINT
                    AS total_duration_seconds,
                COALESCE(SUM(file_size_bytes) FILTER (WHERE status <> 'deleted'), 0)::BIGINT
                    AS total_storage_bytes
            FROM recordings
            WHERE ($1::uuid IS NULL OR user_id = $1)
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }
}

#[async_trait]
impl DeadLetterSink for PgRecordingRepository {
    async fn record(&self, letter: DeadLetter) {
        let result = sqlx::query(
            r#"
            INSERT INTO dead_letters (id, kind, recording_id, subject, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(letter.id)
        .bind(letter.kind.as_str())
        .bind(letter.recording_id)
        .bind(&letter.subject)
        .bind(&letter.error)
        .bind(letter.created_at)
        .execute(&self.pool)
        .await;

        metrics::counter!("recording.dead_letters", "kind" => letter.kind.as_str()).increment(1);

        if let Err(e) = result {
            error!(
                error = %e,
                kind = letter.kind.as_str(),
                recording_id = ?letter.recording_id,
                original_error = %letter.error,
                "Failed to persist dead letter"
            );
        }
    }
}
