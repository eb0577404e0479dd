pub mod client;
pub mod github;
pub mod routes;

pub use client::{ForgeClient, ForgeError};
pub use github::GitHubClient;
pub use routes::{Route, route, snapshot_route};
