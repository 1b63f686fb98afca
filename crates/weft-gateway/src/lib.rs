mod host;
mod routes;
mod server;

pub use host::{RegistryHost, RunnerHost};
pub use routes::{RouteEntry, RouteTable, ROUTE_PREFIX};
pub use server::GatewayServer;
