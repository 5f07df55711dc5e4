pub mod cors;
pub mod internal_key;
