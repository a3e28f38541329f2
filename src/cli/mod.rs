pub mod info;
pub mod recover;
pub mod serve;
pub mod status;
