pub mod account_queries;
pub mod bill_queries;
pub mod transaction_queries;
pub mod user_queries;
