mod app;
mod resumes;

pub use app::{add_routes, AppState};
