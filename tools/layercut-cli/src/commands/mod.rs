pub mod check;
pub mod init;
pub mod plan;
pub mod render;
pub mod validate;
