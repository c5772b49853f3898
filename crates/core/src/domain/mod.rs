pub mod contract;
pub mod symbol;
