use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::capability::{CapabilityMask, CapabilityProvider};
use crate::error::HalResult;

/// Upcast to `Any` so the registry can hand out concrete driver types.
///
/// Blanket-implemented; drivers never implement it by hand.
pub trait AsAny: Any + Send + Sync {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Contract every platform driver implements.
///
/// Methods take `&self`: the registry shares drivers as `Arc<dyn Driver>`,
/// so state changes go through interior mutability.
pub trait Driver: CapabilityProvider + AsAny {
    fn initialize(&self) -> HalResult<()>;

    fn shutdown(&self) -> HalResult<()>;

    fn is_active(&self) -> bool;

    fn priority(&self) -> i32;

    fn name(&self) -> &str;

    /// Platform capabilities this driver cannot run without.
    fn required_capabilities(&self) -> CapabilityMask {
        CapabilityMask::empty()
    }
}

impl fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Key of an interface type. Well-known types are provided as constants;
/// plugins may declare their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InterfaceId(pub &'static str);

impl InterfaceId {
    pub const MEMORY: InterfaceId = InterfaceId("Memory");
    pub const GRAPHICS: InterfaceId = InterfaceId("Graphics");
    pub const AUDIO: InterfaceId = InterfaceId("Audio");
    pub const INPUT: InterfaceId = InterfaceId("Input");
    pub const NETWORK: InterfaceId = InterfaceId("Network");
    pub const TIME: InterfaceId = InterfaceId("Time");
    pub const THREAD: InterfaceId = InterfaceId("Thread");
    pub const FILE: InterfaceId = InterfaceId("File");

    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Lifecycle of one registered candidate.
///
/// `Failed` and `ShutDown` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DriverState {
    Registered,
    Initialized,
    Active,
    Failed,
    ShutDown,
}

