//! Terminal user interface: the serial port picker and the status dashboard.

mod dashboard;
mod device_selector;
mod error;

pub use dashboard::{run_dashboard, Dashboard, Flow};
pub use device_selector::device_selector;
pub use error::GuiError;
