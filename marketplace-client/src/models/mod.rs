pub mod document;
pub mod grant;
pub mod principal;
pub mod profile;
pub mod registration;

pub use document::{DocumentImage, DocumentKind, OcrResult};
pub use grant::{
    scrub_auth_params, Detected, GrantKind, OtpType, PendingGrant, RedirectError, RedirectParams,
    AUTH_PARAMS,
};
pub use principal::{Principal, Session, TokenPair};
pub use profile::{AppRole, ProfilePolicy, ProfileRecord};
pub use registration::{
    AgreementsStep, BasicsStep, BusinessStep, ContactStep, DetailsStep, DocumentsStep,
    RegistrationDraft, StepInput, WizardStep,
};
