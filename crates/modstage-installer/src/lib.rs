mod command_hooks;
mod descriptor;
mod entrypoint;
mod error;
mod flags;
mod hooks;
mod installer;
mod layout;
mod ledger;
mod lock;
mod messages;
mod reporter;

pub use command_hooks::{CommandHandlerProvider, CommandInstaller};
pub use descriptor::ModuleDescriptor;
pub use entrypoint::EntryPointContext;
pub use error::{HookError, InstallError};
pub use flags::InstallFlags;
pub use hooks::{select_upgrade_steps, HandlerProvider, HookContext, ModuleInstaller, Upgrader};
pub use installer::Installer;
pub use layout::AppLayout;
pub use ledger::{InstallLedger, LedgerRecord};
pub use lock::InstallLock;
pub use messages::InstallMessage;
pub use reporter::{InstallReporter, MemoryReporter, Severity};

#[cfg(test)]
mod tests;
