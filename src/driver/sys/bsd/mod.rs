//! kqueue backend.

mod kqueue;

pub use self::kqueue::Selector;
