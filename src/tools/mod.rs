pub mod executor;
pub mod mcp_client;
pub mod rate_limit;
pub mod registry;

pub use executor::ToolExecutor;
pub use mcp_client::McpClient;
pub use rate_limit::{RateLimitedProvider, RateLimiter};
pub use registry::{ToolCatalog, ToolProvider};
