//! Terminal UI: candidate picker and live session dashboard

pub mod dashboard;
pub mod picker;
pub mod theme;

pub use dashboard::{Dashboard, DashboardView};
pub use theme::Theme;
