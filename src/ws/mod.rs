pub mod hub;
pub mod manager;

pub use hub::{EditingHub, EditingPeer, HubError};
pub use manager::HubManager;
