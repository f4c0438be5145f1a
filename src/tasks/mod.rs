pub(crate) mod drain;
pub(crate) mod scheduler;
