pub mod file;
pub mod language;
pub mod room;
pub mod session;

pub use file::{get_file, save_file};
pub use room::room_ws;
pub use session::{create_session, session_ws};
