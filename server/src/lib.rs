pub mod server_state;
pub mod server_config;
pub mod device_hub;
pub mod device_endpoint;
pub mod confirmation;
pub mod routes;
