pub mod file_registry;
pub mod ssh_registry;
pub mod staged_file;

pub use file_registry::FileRegistry;
pub use ssh_registry::SshConnRegistry;
pub use staged_file::{StagedFile, StagedFileError};
