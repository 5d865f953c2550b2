pub mod bridge;
pub mod error;
pub mod firewall;
pub mod gateway;
pub mod interfaces;
pub mod issue;
pub mod settings;
pub mod sysctl;

pub use bridge::{BridgeState, LinkState, MacAddr};
pub use error::NatError;
pub use firewall::{FirewallRule, RuleKind};
pub use gateway::SystemGateway;
pub use interfaces::{InterfacesDocument, NatDirectives, Stanza};
pub use issue::{Issue, IssueSet};
pub use settings::Settings;
