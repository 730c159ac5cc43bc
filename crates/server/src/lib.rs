pub mod collector;
pub mod connections;
pub mod db;
pub mod remote;
pub mod server;
pub mod services;
pub mod version;

#[cfg(test)]
pub(crate) mod test_support;
