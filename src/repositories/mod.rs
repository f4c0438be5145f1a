pub(crate) mod courses;
