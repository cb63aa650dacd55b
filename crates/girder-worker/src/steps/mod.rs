//! Step runners for the leaf worker kinds.

pub mod checkout;
pub mod copy;
pub mod publish;
pub mod shell;

pub use checkout::GitCheckout;
pub use copy::CopyArtifacts;
pub use publish::PublishArtifacts;
pub use shell::ExecuteShell;
