pub(crate) mod course_lookup;
pub(crate) mod drain_lock;
#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod partitioning;
pub(crate) mod pipeline;
pub(crate) mod producer;
pub(crate) mod result_store;
pub(crate) mod submission_queue;
