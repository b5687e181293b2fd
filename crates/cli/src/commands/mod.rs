pub mod checkpoint;
pub mod gateway;
pub mod init;
pub mod serve;
pub mod status;
pub mod telegram;
