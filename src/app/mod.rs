pub mod actor;
pub mod dto;
pub mod workspace;

pub use actor::WorkspaceHandle;
pub use workspace::Workspace;
