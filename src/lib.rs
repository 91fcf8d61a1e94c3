#![doc = include_str!("../README.md")]

pub mod apu;
pub mod bus;
pub mod common;
pub mod error;
pub mod state;

pub mod prelude {
    //! Re-exports of the common structs/enums needed to drive the APU.

    pub use crate::{
        apu::{Apu, Channel, ChannelSample, Config},
        bus::{CpuBus, Irq, Mixer},
        common::{NesRegion, Regional, Reset, ResetKind},
    };
}
