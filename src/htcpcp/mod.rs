//! HTCPCP transport: an HTTP/1.1 front for the teapot.

mod request;
mod server;
mod service;

pub use request::{
    alternates, BrewAction, MessageType, PotMethod, Target, ALLOWED_METHODS, ALTERNATES,
    COFFEE_CONTENT_TYPE, TEA_CONTENT_TYPE,
};
pub use server::HtcpcpServer;
pub use service::HtcpcpService;
