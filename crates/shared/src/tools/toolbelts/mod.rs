pub mod clock;
pub mod file_smith;
