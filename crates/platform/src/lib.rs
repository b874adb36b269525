#![forbid(unsafe_code)]

pub mod io;
pub mod irq;
pub mod resources;
pub mod time;
