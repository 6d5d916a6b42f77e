pub mod frame;
pub mod guard;

pub use frame::{Frame, PageBuf};
pub use guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
