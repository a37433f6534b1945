//! A multi-tenant PostgreSQL wire-protocol gateway: authenticates connections,
//! resolves row filters and column masks against an external metastore, rewrites
//! SQL accordingly, and forwards it to an external analytical executor.

pub mod authz;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod memstore;
pub mod metastore;
pub mod model;
pub mod protocol;
pub mod query_type;
pub mod rewrite;
pub mod server;

pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
