// src/lib.rs
pub mod search {
    pub mod config;
    pub mod engine;
    pub mod session;
    pub mod sdk;
}

pub mod data {
    pub mod store;
    pub mod transfer;
}

pub mod error;
