pub mod account;
pub mod block;
pub mod client;
pub mod filter;
pub mod transaction;
