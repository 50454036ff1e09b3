pub mod controller;
pub mod heartbeat;
pub mod notify;
