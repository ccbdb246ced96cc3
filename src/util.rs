pub(crate) mod batch;
pub(crate) mod json;
pub(crate) mod keyed_lock;
pub(crate) mod persist;
pub mod retry;
