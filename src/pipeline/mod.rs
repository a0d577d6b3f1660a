//! Bridge pipeline components.
//!
//! One worker task moves audio from the accessory to the host:
//!
//! ```text
//! Isochronous Pipe → Transfer Ring → Scheduler → Feeder → Render Sink
//! ```
//!
//! - **Transfer Ring**: Fixed arena of slots over one capture buffer
//! - **Scheduler**: Keeps every slot in flight and drains them in FIFO order
//! - **Feeder**: Converts each packet and commits what fits in the host buffer
//!
//! No allocation happens after the session is set up.

mod feeder;
mod scheduler;
mod slots;

pub(crate) use feeder::RenderFeeder;
pub(crate) use scheduler::TransferScheduler;
pub(crate) use slots::{slot_count, TransferRing};
