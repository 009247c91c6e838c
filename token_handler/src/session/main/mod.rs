mod cookie;
mod keys;
mod manager;
mod session;
mod sweeper;

pub use keys::{KeyPair, KeyPairSet};
pub use manager::SessionManager;
pub use session::Session;
pub use sweeper::purge_expired;
