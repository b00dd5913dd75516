//! NATS connectivity for pushing credentials to remote clusters

pub mod client;
pub mod resolver;

pub use client::{NatsClient, NatsConnector};
pub use resolver::{
    claims_delete_subject, claims_lookup_subject, parse_resolver_response, ClusterConnection,
    Resolver, ResolverConnector, ResolverError, ResolverSession, CLAIMS_UPDATE_SUBJECT,
    DEFAULT_RESOLVER_TIMEOUT,
};
