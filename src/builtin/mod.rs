//! Extensions bundled with the host.
//!
//! Both are registered by [`ExtensionCatalog::with_builtins`](crate::loader::ExtensionCatalog::with_builtins)
//! under their `TYPE_NAME`, so a unit manifest can name them in `entrypoints`.

mod echo;
mod votes;

pub use echo::EchoExtension;
pub use votes::{Permission, PollExtension, PollResult};
