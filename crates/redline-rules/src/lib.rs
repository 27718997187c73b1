pub mod builtin;
pub mod engine;

pub use builtin::{default_rules, load_rules};
pub use engine::NegotiationAdviceStage;
