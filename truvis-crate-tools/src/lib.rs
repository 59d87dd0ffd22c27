//! Truvis 工具集
//!
//! 提供在各个 crate 之间共享的日志初始化工具。
//!
//! - [`init_log::init_log`]：应用程序入口使用，带颜色和时间戳的 env_logger
//! - [`init_log::init_test_log`]：测试使用，可以被重复调用

pub mod init_log;
