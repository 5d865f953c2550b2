pub mod iptables;

pub use iptables::*;
