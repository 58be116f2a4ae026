// Annobatch Infrastructure - System Adapters
// Implements: WorkSource (image directories), TaskHandler (no-op, external command)

pub mod handler;
pub mod work_source;

pub use handler::{CommandTaskHandler, NoopTaskHandler};
pub use work_source::DirectoryWorkSource;
