pub mod rpc;
pub mod types;
