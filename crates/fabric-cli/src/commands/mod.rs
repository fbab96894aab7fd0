pub mod demo;
pub mod ledger;
pub mod publish;
pub mod workflow;
