pub mod net;
pub mod pattern;
pub mod proto;
pub mod registry;
pub mod server;
pub mod subscriber;
