pub mod config;
pub mod http;
pub mod in_flight;
pub mod index;
pub mod metrics;
pub mod pool;
pub mod profile;
pub mod scan;
pub mod scan_logic;
pub mod solr;
pub mod ttl_cache;
