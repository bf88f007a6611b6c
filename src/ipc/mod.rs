pub mod client;
pub mod framing;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{ActionClass, Envelope, Request, Response};
