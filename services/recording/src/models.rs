use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::storage::object_key;

/// Quality used when a start request leaves it blank
pub const DEFAULT_QUALITY: &str = "medium";

/// Returned by the `FromStr` impls when a stored or requested value is unknown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

/// Captured media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingType {
    Audio,
    Video,
}

string_enum!(RecordingType, "recording type", {
    Audio => "audio",
    Video => "video",
});

impl RecordingType {
    /// Content type presented to the blob store for uploads
    pub fn content_type(&self) -> &'static str {
        match self {
            RecordingType::Audio => "audio/m4a",
            RecordingType::Video => "video/mp4",
        }
    }
}

/// Which side of the trip made the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderRole {
    Rider,
    Driver,
}

string_enum!(RecorderRole, "recorder role", {
    Rider => "rider",
    Driver => "driver",
});

/// Recording lifecycle.
///
/// ```text
/// initialized -> recording <-> paused
///                    |           |
///                    +-> stopped <+
///                           |
///                 uploading -> uploaded -> processing -> completed | failed
/// ```
///
/// Every state except `deleted` may move to `deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Initialized,
    Recording,
    Paused,
    Stopped,
    Uploading,
    Uploaded,
    Processing,
    Completed,
    Failed,
    Deleted,
}

string_enum!(RecordingStatus, "recording status", {
    Initialized => "initialized",
    Recording => "recording",
    Paused => "paused",
    Stopped => "stopped",
    Uploading => "uploading",
    Uploaded => "uploaded",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Deleted => "deleted",
});

impl RecordingStatus {
    pub const TERMINAL: [RecordingStatus; 3] = [
        RecordingStatus::Completed,
        RecordingStatus::Failed,
        RecordingStatus::Deleted,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Whether the capture session is still running
    pub fn is_capturing(&self) -> bool {
        matches!(self, RecordingStatus::Recording | RecordingStatus::Paused)
    }

    pub fn can_transition_to(&self, next: RecordingStatus) -> bool {
        use RecordingStatus::*;

        if next == Deleted {
            return *self != Deleted;
        }

        matches!(
            (self, next),
            (Initialized, Recording)
                | (Recording, Paused)
                | (Paused, Recording)
                | (Recording, Stopped)
                | (Paused, Stopped)
                | (Stopped, Uploading)
                | (Stopped, Uploaded)
                | (Uploading, Uploaded)
                | (Uploaded, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

/// How long a recording is kept before cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    #[default]
    Standard,
    Extended,
    Permanent,
}

string_enum!(RetentionPolicy, "retention policy", {
    Standard => "standard",
    Extended => "extended",
    Permanent => "permanent",
});

impl RetentionPolicy {
    pub fn retention_period(&self) -> Duration {
        match self {
            RetentionPolicy::Standard => Duration::days(7),
            RetentionPolicy::Extended => Duration::days(30),
            RetentionPolicy::Permanent => Duration::days(3650),
        }
    }

    pub fn expires_at(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + self.retention_period()
    }
}

/// Why a recording's media URL was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    View,
    AdminView,
}

string_enum!(AccessType, "access type", {
    View => "view",
    AdminView => "admin_view",
});

/// Device the recording was captured on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub app_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One audio/video capture session tied to a ride and its recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub user_id: Uuid,
    pub user_role: RecorderRole,
    pub recording_type: RecordingType,
    pub status: RecordingStatus,
    pub retention_policy: RetentionPolicy,

    pub file_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub duration_seconds: Option<i32>,
    pub format: Option<String>,
    pub quality: String,
    pub encrypted: bool,
    pub encryption_key_id: Option<String>,

    // Chunked transfer progress
    pub upload_id: Option<String>,
    pub chunks_received: i32,
    pub chunks_total: Option<i32>,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub device_info: Option<DeviceInfo>,
    pub start_location: Option<GeoPoint>,
    pub end_location: Option<GeoPoint>,

    /// Optimistic concurrency token, bumped on every update
    pub version: i64,
}

impl Recording {
    /// Build a fresh `initialized` row. New rows always start encrypted and
    /// under the standard retention window.
    pub fn initialize(
        user_id: Uuid,
        user_role: RecorderRole,
        request: &StartRecordingRequest,
        recording_type: RecordingType,
        now: DateTime<Utc>,
    ) -> Self {
        let quality = request
            .quality
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_QUALITY)
            .to_string();

        Self {
            id: Uuid::new_v4(),
            ride_id: request.ride_id,
            user_id,
            user_role,
            recording_type,
            status: RecordingStatus::Initialized,
            retention_policy: RetentionPolicy::Standard,
            file_url: None,
            thumbnail_url: None,
            file_size_bytes: None,
            duration_seconds: None,
            format: Some(crate::storage::extension_for(recording_type.as_str()).to_string()),
            quality,
            encrypted: true,
            encryption_key_id: None,
            upload_id: None,
            chunks_received: 0,
            chunks_total: None,
            started_at: now,
            ended_at: None,
            uploaded_at: None,
            processed_at: None,
            expires_at: RetentionPolicy::Standard.expires_at(now),
            created_at: now,
            updated_at: now,
            device_info: request.device_info.clone(),
            start_location: request.start_location,
            end_location: None,
            version: 1,
        }
    }

    /// Blob store key backing this recording
    pub fn object_key(&self) -> String {
        object_key(
            self.ride_id,
            self.user_id,
            self.id,
            self.recording_type.as_str(),
        )
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}

/// Per-ride, per-user agreement to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consent {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub user_id: Uuid,
    pub user_role: RecorderRole,
    pub consented: bool,
    pub consented_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Append-only record of a media URL being issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLog {
    pub id: Uuid,
    pub recording_id: Uuid,
    pub accessed_by: Uuid,
    pub access_type: AccessType,
    pub reason: Option<String>,
    pub accessed_at: DateTime<Utc>,
}

/// Per-user recording preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub user_id: Uuid,
    pub auto_record: bool,
    pub default_recording_type: RecordingType,
    pub default_quality: String,
    pub notify_on_recording: bool,
    pub default_retention_policy: RetentionPolicy,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordingSettings {
    /// Settings reported for users who never saved any. Not persisted.
    pub fn default_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            auto_record: false,
            default_recording_type: RecordingType::Audio,
            default_quality: DEFAULT_QUALITY.to_string(),
            notify_on_recording: true,
            default_retention_policy: RetentionPolicy::Standard,
            updated_at: None,
        }
    }

    pub fn apply(&mut self, update: &UpdateSettingsRequest) {
        if let Some(auto_record) = update.auto_record {
            self.auto_record = auto_record;
        }
        if let Some(recording_type) = update.default_recording_type {
            self.default_recording_type = recording_type;
        }
        if let Some(quality) = update.default_quality.as_deref().map(str::trim) {
            if !quality.is_empty() {
                self.default_quality = quality.to_string();
            }
        }
        if let Some(notify) = update.notify_on_recording {
            self.notify_on_recording = notify;
        }
        if let Some(policy) = update.default_retention_policy {
            self.default_retention_policy = policy;
        }
    }
}

/// Aggregate counts over the recordings table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecordingStats {
    pub total_recordings: i64,
    pub active_recordings: i64,
    pub completed_recordings: i64,
    pub failed_recordings: i64,
    pub deleted_recordings: i64,
    pub audio_recordings: i64,
    pub video_recordings: i64,
    pub total_duration_seconds: i64,
    pub total_storage_bytes: i64,
}

/// Start request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRecordingRequest {
    pub ride_id: Uuid,
    pub recording_type: String,
    pub quality: Option<String>,
    pub device_info: Option<DeviceInfo>,
    pub start_location: Option<GeoPoint>,
}

/// Returned by a successful start: where and how to upload the media
#[derive(Debug, Clone, Serialize)]
pub struct StartRecordingResponse {
    pub recording_id: Uuid,
    pub upload_url: String,
    pub upload_method: String,
    pub upload_headers: HashMap<String, String>,
    pub upload_key: String,
    pub upload_expires_at: DateTime<Utc>,
    pub max_duration_secs: u64,
    pub max_file_size_bytes: u64,
    pub status: RecordingStatus,
}

/// A recording plus an optional time-limited media URL
#[derive(Debug, Clone, Serialize)]
pub struct RecordingAccess {
    #[serde(flatten)]
    pub recording: Recording,
    pub access_url: Option<String>,
    pub access_url_expires_at: Option<DateTime<Utc>>,
}

/// Partial settings update; absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSettingsRequest {
    pub auto_record: Option<bool>,
    pub default_recording_type: Option<RecordingType>,
    pub default_quality: Option<String>,
    pub notify_on_recording: Option<bool>,
    pub default_retention_policy: Option<RetentionPolicy>,
}
