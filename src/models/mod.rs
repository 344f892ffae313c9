pub mod file_record;
pub mod progress;
pub mod search;
