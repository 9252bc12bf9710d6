pub mod account;
pub mod account_rule;
pub mod egress_target;
pub mod rule_group;

pub use account::Entity as Account;
pub use account_rule::Entity as AccountRule;
pub use egress_target::Entity as EgressTarget;
pub use rule_group::Entity as RuleGroup;
