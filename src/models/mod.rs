pub mod error;
pub mod file;
pub mod messages;

pub use error::ErrorResponse;
pub use file::{FileContentResponse, SaveFileRequest, SaveFileResponse, SessionCreateResponse};
pub use messages::SessionMessage;
