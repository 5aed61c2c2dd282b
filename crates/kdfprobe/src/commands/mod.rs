pub mod list;
pub mod regions;
