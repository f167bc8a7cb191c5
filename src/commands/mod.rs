pub mod export;
pub mod kinds;

pub use export::{ExportArgs, ExportCommand};
pub use kinds::KindsCommand;
