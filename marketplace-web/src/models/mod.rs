pub mod page;
pub mod user;

pub use page::{ErrorView, StepField};
pub use user::{AuthUser, UserView};
