//! Data models for the mess

mod bazar;
mod billing;
mod hostel;
mod meal;
mod membership;
pub(crate) mod money;
mod seat;
mod user;

pub use bazar::*;
pub use billing::*;
pub use hostel::*;
pub use meal::*;
pub use membership::*;
pub use money::*;
pub use seat::*;
pub use user::*;
