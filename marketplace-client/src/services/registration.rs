//! Multi-step profile registration for organizers and exhibitors.
//!
//! The draft is saved to browser storage after every step, keyed by role
//! and user, so a reload resumes where the user left off and a different
//! user signing in on the same browser starts fresh.

use std::sync::Arc;
use thiserror::Error;
use validator::ValidationErrors;

use super::profile_store::ProfileStore;
use super::storage::AuthStorage;
use crate::error::{ProfileError, StorageError};
use crate::models::{AppRole, ProfileRecord, RegistrationDraft, Session, StepInput, WizardStep};

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Step '{requested}' is not available until '{current}' is complete")]
    StepLocked {
        requested: WizardStep,
        current: WizardStep,
    },

    #[error("Registration is incomplete: '{0}' is missing")]
    Incomplete(WizardStep),

    #[error("The {0} app has no registration")]
    NotSupported(AppRole),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

pub struct RegistrationWizard {
    role: AppRole,
    storage: AuthStorage,
    profiles: Arc<dyn ProfileStore>,
}

impl RegistrationWizard {
    pub fn new(
        role: AppRole,
        storage: AuthStorage,
        profiles: Arc<dyn ProfileStore>,
    ) -> Result<Self, RegistrationError> {
        if role.profile_table().is_none() {
            return Err(RegistrationError::NotSupported(role));
        }
        Ok(Self {
            role,
            storage,
            profiles,
        })
    }

    /// The saved draft for this user, or a new one at the first step.
    pub async fn resume(&self, user_id: &str) -> Result<RegistrationDraft, RegistrationError> {
        match self.storage.load_draft(self.role, user_id).await {
            Ok(Some(draft)) => Ok(draft),
            Ok(None) => Ok(RegistrationDraft::new(self.role, user_id)),
            Err(StorageError::Corrupt { key, reason }) => {
                tracing::warn!(%key, %reason, "Discarding unreadable registration draft");
                self.storage.remove_draft(self.role, user_id).await?;
                Ok(RegistrationDraft::new(self.role, user_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Draft positioned for showing `step`, refused past the furthest step
    /// reached.
    pub async fn visit(
        &self,
        user_id: &str,
        step: WizardStep,
    ) -> Result<RegistrationDraft, RegistrationError> {
        let draft = self.resume(user_id).await?;
        if step > draft.current_step {
            return Err(RegistrationError::StepLocked {
                requested: step,
                current: draft.current_step,
            });
        }
        Ok(draft)
    }

    /// Validate and store one step. Completing the furthest step unlocks the
    /// next one; editing an earlier step leaves progress alone.
    #[tracing::instrument(skip(self, input), fields(role = %self.role, step = %input.step()))]
    pub async fn save_step(
        &self,
        user_id: &str,
        input: StepInput,
    ) -> Result<RegistrationDraft, RegistrationError> {
        input.validate()?;

        let mut draft = self.resume(user_id).await?;
        let step = input.step();
        if step > draft.current_step {
            return Err(RegistrationError::StepLocked {
                requested: step,
                current: draft.current_step,
            });
        }

        draft.apply(input);
        if step == draft.current_step {
            if let Some(next) = step.next() {
                draft.current_step = next;
            }
        }

        self.storage.save_draft(&draft).await?;
        tracing::debug!(current = %draft.current_step, "Saved registration step");
        Ok(draft)
    }

    /// Write the finished profile and drop the draft.
    #[tracing::instrument(skip(self, session), fields(role = %self.role, user_id = %session.principal.id))]
    pub async fn submit(&self, session: &Session) -> Result<ProfileRecord, RegistrationError> {
        let user_id = session.principal.id.as_str();
        let draft = self.resume(user_id).await?;
        let record = draft.to_record().map_err(RegistrationError::Incomplete)?;

        let saved = self
            .profiles
            .upsert(self.role, &record, &session.access_token)
            .await?;
        self.storage.remove_draft(self.role, user_id).await?;

        tracing::info!("Registration submitted");
        Ok(saved)
    }
}
