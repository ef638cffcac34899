pub mod capture;
pub mod config;
pub mod models;
pub mod session;
pub mod storage;
