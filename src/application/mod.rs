pub mod agent;
pub mod broadcast;
pub mod connection;
pub mod download_coordinator;
pub mod icon_animation;
pub mod messages;

pub use agent::{Agent, AgentHandle};
pub use broadcast::HubEvent;
pub use messages::LocalRequest;
