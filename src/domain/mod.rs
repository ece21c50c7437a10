pub mod error;
pub mod hooks;
mod spec;
pub mod traits;

pub use error::{BoxError, Error, Result};
pub use hooks::{ContainerHook, HookPoint, LifecycleHooks};
pub use spec::{
    ContainerFile, ContainerMount, ContainerSpec, ContainerState, DEFAULT_FILE_MODE,
    DEFAULT_IMAGE, DEFAULT_PORT, WaitStrategy,
};
pub use traits::{ContainerRuntime, LogSink, LogStream};
