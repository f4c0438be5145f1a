pub(crate) mod errors;
pub(crate) mod exams;
pub(crate) mod handlers;
pub(crate) mod router;
