pub mod gateway;
pub mod handlers;
pub mod proxy;
pub mod request;
pub mod response;
pub mod router;
