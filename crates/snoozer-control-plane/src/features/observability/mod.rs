pub mod controller;
pub mod repo;
