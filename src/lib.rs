pub mod backend;
pub mod config;
pub mod directory;
pub mod error;
pub mod filter;
pub mod limits;
pub mod listing;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod reservation;
pub mod sort;
