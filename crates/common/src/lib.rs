//! Types and Docker output parsers shared by the FleetDock server components.

pub mod models;
pub mod parsers;

pub use models::{
    ConnectionAuth, ContainerMetricSample, ContainerStats, ManagedServer, RemoteContainer,
    ServerConnection, ServerMetricsSummary, ServerStatus,
};
