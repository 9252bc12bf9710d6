pub mod account;
pub mod egress;
pub mod inventory;
pub mod rule;
pub mod system;

pub use account::*;
pub use egress::*;
pub use inventory::*;
pub use rule::*;
pub use system::*;
