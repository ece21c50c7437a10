pub mod manage;
pub mod probe;
pub mod run;

pub use manage::ManageAction;
pub use probe::ProbeCommand;
pub use run::RunCommand;
