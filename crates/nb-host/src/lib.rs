pub mod kernel;
pub mod package;
pub mod probe;
pub mod service;

pub use kernel::*;
pub use package::*;
pub use probe::*;
pub use service::*;
