// Library for tests to access modules

pub mod aggregator;
pub mod config;
pub mod ingress;
pub mod models;
pub mod publisher;
pub mod registry;
pub mod routes;
pub mod version;
pub mod worker;
