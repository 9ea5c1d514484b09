pub mod client;
pub mod dispatch;
pub mod server;

// Re-export common types
pub use client::RpcClient;
pub use dispatch::RpcDispatcher;
pub use server::serve;
