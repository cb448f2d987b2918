// Wire protocol for the daemon socket.

pub mod jsonrpc;
pub mod rpc_methods;
