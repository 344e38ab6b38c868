//! Per-process routing policy

pub mod lan;
pub mod matcher;
pub mod table;

pub use lan::{LanBypass, LAN_RANGES};
pub use matcher::{parse_cidr, CidrSet};
pub use table::{PolicyTable, ProcessRule};
