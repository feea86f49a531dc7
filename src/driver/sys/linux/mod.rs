//! epoll backend.

mod epoll;

pub use self::epoll::Selector;
