// ABOUTME: Library crate for gridconn exposing the connector API for embedding and tests

#![allow(missing_docs)]

pub mod connector;

pub use connector::{
    Connection, ConnectionPool, ConnectorConfig, ConnectorError, ConnectorResult, Interface, LoadClass,
};
