pub mod cli;
pub mod container;
pub mod domain;
pub mod infra;
pub mod logs;
pub mod options;
pub mod readiness;

// Public so integration tests can drive the lifecycle without podman.
pub mod test_support;

pub use container::{
    Container, ContainerRef, Endpoint, STOP_GRACE, new_container, run_container, server_host_port,
};
pub use domain::{
    ContainerRuntime, ContainerSpec, ContainerState, Error, HookPoint, LogSink, Result,
    WaitStrategy,
};
pub use infra::PodmanAdapter;
pub use logs::{LogAttachment, TracingSink};
pub use options::Customizer;
pub use readiness::{ProbeSettings, check_available};
