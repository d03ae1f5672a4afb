//! 传输层：stdio 字节流分帧、JSON-RPC 请求关联、Provider 子进程

pub mod correlator;
pub mod framer;
pub mod process;
pub mod rpc;

pub use correlator::Correlator;
pub use framer::{extract_first_object, JsonFramer};
pub use process::{ProviderCommand, ProviderProcess};
pub use rpc::{CallToolResult, RpcRequest, ToolInfo, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST};
