pub mod memory;
pub mod models;
pub mod repository;
pub mod store;

pub use memory::InMemoryLinkStore;
pub use repository::PgLinkStore;
pub use store::LinkStore;
