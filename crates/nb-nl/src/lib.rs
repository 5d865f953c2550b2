pub mod addr;
pub mod link;
pub mod route;

pub use addr::*;
pub use link::*;
pub use route::*;
