pub mod jobs;
pub mod rest;

pub use jobs::JobRegistry;
pub use rest::{router, AppState};
