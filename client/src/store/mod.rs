pub(crate) mod client;
pub mod document;
pub(crate) mod memory;
pub(crate) mod mqtt;
pub(crate) mod status;
