//! Mission wrapper infrastructure

pub mod child;
pub mod config_tree;
pub mod credential_sync;
pub mod event_loop;
pub mod socket;
pub mod state;
pub mod token_expiry;
pub mod watchers;

pub use child::{AgentLauncher, AgentProcess, ChildExit, Signal};
pub use config_tree::{ConfigTree, CopyConfigTree};
pub use credential_sync::{CredentialHash, CredentialSync, PullOutcome, PushOutcome};
pub use event_loop::Wrapper;
pub use socket::{CommandRequest, ERR_WRAPPER_BUSY, SocketServerHandle, start_socket_server};
pub use state::{Directive, ExitDisposition, LaunchMode, Lifecycle, SupervisorState};
pub use token_expiry::{TokenExpiry, TokenMonitor, TokenStatus};
pub use watchers::remote_ref::{GitRepoCache, RepoCache};
pub use watchers::template::{CommitSource, GitCommitSource};
pub use watchers::{Notifier, notifier};
