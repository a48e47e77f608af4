pub mod balances;
pub mod connect;
pub mod entries;
pub mod expiry;
pub mod idgen;
pub mod mint;
pub mod models;
pub mod mutations;
pub mod queries;
pub mod redeem;

#[cfg(test)]
pub mod test_support;
