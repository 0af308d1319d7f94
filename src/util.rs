pub mod lru_store;
pub mod persist;
pub mod retry;
pub mod time;
