// data module
pub mod data {
    pub mod technique;
    pub mod grid;
    pub mod spectrum;
    pub mod matches;
}

// algorithm module
pub mod algorithm {
    pub mod preprocess;
    pub mod peaks;
    pub mod scoring;
    pub mod mixture;
}

pub mod database;
pub mod synthetic;
pub mod error;
