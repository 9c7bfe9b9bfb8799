use crate::error::{ServiceError, ServiceResult};
use crate::models::{Consent, RecorderRole};
use crate::repository::RecordingRepository;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Consent submitted by a trip participant
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub ride_id: Uuid,
    pub consented: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Per-ride, per-user record of agreement to be recorded.
///
/// Latest write wins; no history is kept. Recording start is not gated on
/// this ledger here, callers check [`ConsentLedger::check_consent`] before
/// letting a session begin.
pub struct ConsentLedger {
    repository: Arc<dyn RecordingRepository>,
}

impl ConsentLedger {
    pub fn new(repository: Arc<dyn RecordingRepository>) -> Self {
        Self { repository }
    }

    /// Upsert the (ride, user) consent row, stamped with the service clock
    #[instrument(skip(self, request), fields(ride_id = %request.ride_id, consented = request.consented))]
    pub async fn record_consent(
        &self,
        user_id: Uuid,
        role: RecorderRole,
        request: ConsentRequest,
    ) -> ServiceResult<Consent> {
        if user_id.is_nil() {
            return Err(ServiceError::bad_request("user_id is required"));
        }
        if request.ride_id.is_nil() {
            return Err(ServiceError::bad_request("ride_id is required"));
        }

        let consent = Consent {
            id: Uuid::new_v4(),
            ride_id: request.ride_id,
            user_id,
            user_role: role,
            consented: request.consented,
            consented_at: Utc::now(),
            ip_address: request.ip_address,
            user_agent: request.user_agent,
        };

        let stored = self.repository.upsert_consent(&consent).await?;

        info!(user_id = %user_id, role = %role, "Recording consent recorded");

        Ok(stored)
    }

    /// True iff both trip participants have consented
    pub async fn check_consent(&self, ride_id: Uuid) -> ServiceResult<bool> {
        Ok(self.repository.check_all_consented(ride_id).await?)
    }

    pub async fn get_ride_consents(&self, ride_id: Uuid) -> ServiceResult<Vec<Consent>> {
        Ok(self.repository.list_consents(ride_id).await?)
    }
}
