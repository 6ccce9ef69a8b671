mod command;
mod node;
mod operation;
mod patch;
mod status;

pub use command::{CommandBus, SyncCommand};
pub use node::{Node, NodeType};
pub use operation::{EndpointInfo, Operation, OperationType};
pub use patch::{Patch, PatchError, SessionId, SessionProvider, TargetIndex};
pub use status::{PatchEvent, ProcessStatus, StatusSink};
