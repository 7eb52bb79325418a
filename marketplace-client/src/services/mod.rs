pub mod gotrue;
pub mod identity;
pub mod mock;
pub mod object_storage;
pub mod ocr;
pub mod postgrest;
pub mod profile_store;
pub mod registration;
pub mod storage;

pub use gotrue::GoTrueClient;
pub use identity::{AuthEvent, IdentityProvider, SignUpOutcome};
pub use mock::{MockIdentityProvider, MockOcr, MockProfileStore};
pub use object_storage::ObjectStorageClient;
pub use ocr::{DocumentOcr, GeminiVisionOcr, OcrError};
pub use postgrest::PostgrestProfileStore;
pub use profile_store::ProfileStore;
pub use registration::{RegistrationError, RegistrationWizard};
pub use storage::{AuthStorage, BrowserStorage, MemoryStorage, StorageScope};
