pub mod registry;

pub use registry::{ConnectionRegistry, ConnectionSecret, ConnectionUpdate, NewConnection, RegistryError};
