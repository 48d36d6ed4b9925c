use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::Component;

pub const STATE_VERSION: u32 = 2;

/// Process-wide rig status shared by every host and the control client.
///
/// Busy flags are advisory: the client checks them before sending, but
/// nothing stops a request that raced past a flag flip. Hosts reject
/// conflicting requests themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub version: u32,
    pub harness_busy: bool,
    pub imaging_busy: bool,
    pub receiver_busy: bool,
    pub actuator_connected: bool,
    pub imaging_connected: bool,
    pub pipeline: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            harness_busy: false,
            imaging_busy: false,
            receiver_busy: false,
            actuator_connected: false,
            imaging_connected: false,
            pipeline: None,
        }
    }
}

impl SessionState {
    pub fn is_busy(&self, component: Component) -> bool {
        match component {
            Component::Harness => self.harness_busy,
            Component::Imaging => self.imaging_busy,
            Component::Receiver => self.receiver_busy,
        }
    }

    pub fn set_busy(&mut self, component: Component, busy: bool) {
        match component {
            Component::Harness => self.harness_busy = busy,
            Component::Imaging => self.imaging_busy = busy,
            Component::Receiver => self.receiver_busy = busy,
        }
    }
}

/// Cheaply cloneable handle to the shared [`SessionState`].
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<Mutex<SessionState>>);

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A panic elsewhere must not take the status board down with it.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn is_busy(&self, component: Component) -> bool {
        self.lock().is_busy(component)
    }

    pub fn set_busy(&self, component: Component, busy: bool) {
        self.lock().set_busy(component, busy);
    }

    /// First busy component among `components`, if any.
    pub fn first_busy(&self, components: &[Component]) -> Option<Component> {
        let state = self.lock();
        components.iter().copied().find(|c| state.is_busy(*c))
    }
}
