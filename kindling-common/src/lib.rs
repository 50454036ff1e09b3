pub mod ledger;
pub mod logging;
pub mod model;
pub mod persona;
pub mod store;

pub use tracing;

/// Control signal broadcast to every long-running component.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}
