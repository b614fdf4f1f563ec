pub mod connection;
pub mod connector;
pub mod reconnector;
pub mod server;
