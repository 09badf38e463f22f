pub mod content_type;
pub mod kvpair;
pub mod ref_obj;
pub mod schedule;
pub mod talk;
pub mod user;
pub mod user_profile;

#[cfg(test)]
pub(crate) mod test_utils;
