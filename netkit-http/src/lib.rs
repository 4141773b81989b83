pub mod client;
pub mod error;
pub mod message;
mod sock;

pub use client::Client;
pub use error::HttpError;
pub use message::{Headers, Method, Request, Response};
