pub mod pacer;
pub mod supply;

pub use pacer::{FramePacer, FramePlan, PendingImage};
pub use supply::{
    FrameConsumer, ImageFrameSupply, ImageFrameSupplyHandle, ReadySignal, SupplyState,
    SupplyStatus,
};
