//! Tracy 性能分析
//!
//! `profile_scope!` 只在 Tracy client 已经启动时打开一个 span，
//! 没有 client 的测试与工具中是空操作。

#[doc(hidden)]
pub use tracy_client as __tracy;

/// 在当前作用域打开一个 Tracy span
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::__tracy::Client::running()
            .map(|client| client.span_alloc(Some($name), "", file!(), line!(), 0));
    };
}
