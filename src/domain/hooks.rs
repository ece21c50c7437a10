use crate::container::ContainerRef;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Extension points a hook can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    PreStart,
    PostStart,
    PreStop,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreStart => write!(f, "pre-start"),
            Self::PostStart => write!(f, "post-start"),
            Self::PreStop => write!(f, "pre-stop"),
        }
    }
}

type HookFn = dyn Fn(ContainerRef) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A callback receiving the live container it is attached to.
#[derive(Clone)]
pub struct ContainerHook(Arc<HookFn>);

impl ContainerHook {
    pub fn new<F, Fut>(hook: F) -> Self
    where
        F: Fn(ContainerRef) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |container| hook(container).boxed()))
    }

    pub async fn call(&self, container: ContainerRef) -> anyhow::Result<()> {
        (self.0)(container).await
    }
}

impl fmt::Debug for ContainerHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContainerHook")
    }
}

/// Ordered hook lists, one per extension point.
///
/// Hooks only ever accumulate: registering a hook never replaces one that is
/// already bound to the same point.
#[derive(Debug, Clone, Default)]
pub struct LifecycleHooks {
    pre_starts: Vec<ContainerHook>,
    post_starts: Vec<ContainerHook>,
    pre_stops: Vec<ContainerHook>,
}

impl LifecycleHooks {
    pub fn push(&mut self, point: HookPoint, hook: ContainerHook) {
        self.list_mut(point).push(hook);
    }

    pub fn at(&self, point: HookPoint) -> &[ContainerHook] {
        match point {
            HookPoint::PreStart => &self.pre_starts,
            HookPoint::PostStart => &self.post_starts,
            HookPoint::PreStop => &self.pre_stops,
        }
    }

    pub fn len(&self, point: HookPoint) -> usize {
        self.at(point).len()
    }

    pub fn is_empty(&self) -> bool {
        self.pre_starts.is_empty() && self.post_starts.is_empty() && self.pre_stops.is_empty()
    }

    fn list_mut(&mut self, point: HookPoint) -> &mut Vec<ContainerHook> {
        match point {
            HookPoint::PreStart => &mut self.pre_starts,
            HookPoint::PostStart => &mut self.post_starts,
            HookPoint::PreStop => &mut self.pre_stops,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> ContainerHook {
        ContainerHook::new(|_| async { anyhow::Ok(()) })
    }

    #[test]
    fn test_hooks_accumulate_per_point() {
        let mut hooks = LifecycleHooks::default();
        assert!(hooks.is_empty());

        hooks.push(HookPoint::PreStart, noop());
        hooks.push(HookPoint::PreStart, noop());
        hooks.push(HookPoint::PreStop, noop());

        assert_eq!(hooks.len(HookPoint::PreStart), 2);
        assert_eq!(hooks.len(HookPoint::PostStart), 0);
        assert_eq!(hooks.len(HookPoint::PreStop), 1);
        assert!(!hooks.is_empty());
    }

    #[test]
    fn test_hook_point_display() {
        assert_eq!(HookPoint::PreStart.to_string(), "pre-start");
        assert_eq!(HookPoint::PostStart.to_string(), "post-start");
        assert_eq!(HookPoint::PreStop.to_string(), "pre-stop");
    }
}
