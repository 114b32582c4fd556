//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod driver;
pub mod pipeline;
pub mod pool;
pub mod ring;
pub mod synthetic;

pub use capture::CpalBackend;
pub use device::{find_input_device, list_input_devices, InputDeviceInfo};
pub use driver::{BufferIntake, CaptureBackend, RecordControl, RecordState};
pub use pipeline::{kickstart, CaptureStage, NetworkStage, QueueDepths};
pub use pool::{BufferHandle, BufferPool};
pub use ring::{ring, Consumer, Producer, RingHandle};
pub use synthetic::SyntheticBackend;
