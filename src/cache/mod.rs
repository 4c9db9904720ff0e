//! Scene Cache
//!
//! Per-scene, per-option generation state: published layer1/layer2 artifacts,
//! option status, wait gates and layer2 control, all guarded by one mutex.

pub mod entry;
pub mod gate;
pub mod store;

pub use entry::{Layer2Mode, OptionStatus, SceneCacheEntry};
pub use gate::{GateTicket, GateWake, WaitGate};
pub use store::{CacheInner, SceneCache, SceneSnapshot};
