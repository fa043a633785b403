pub mod init;
pub mod list;
pub mod transfer;
pub mod util;
