use std::io::Write;

use env_logger::fmt::Formatter;

/// 日志的默认过滤级别，可以被 `RUST_LOG` 覆盖
const DEFAULT_FILTER: log::LevelFilter = log::LevelFilter::Info;

/// 应用程序入口处调用，只能调用一次
pub fn init_log() {
    init_log_with(DEFAULT_FILTER);
}

/// 指定默认过滤级别初始化日志
///
/// `RUST_LOG` 环境变量的优先级高于 `filter`
pub fn init_log_with(filter: log::LevelFilter) {
    env_logger::Builder::new()
        .format(format_record)
        .filter(None, filter)
        .parse_default_env()
        .init();
}

/// 测试中使用的日志初始化
///
/// 多个测试会重复调用，因此使用 `try_init` 并忽略重复初始化的错误；
/// 输出交给 libtest 捕获。
pub fn init_test_log() {
    let _ = env_logger::Builder::new()
        .format(format_record)
        .filter(None, log::LevelFilter::Debug)
        .parse_default_env()
        .is_test(true)
        .try_init();
}

fn format_record(buf: &mut Formatter, record: &log::Record) -> std::io::Result<()> {
    let info_style = buf
        .default_level_style(log::Level::Info)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
    let warn_style = buf
        .default_level_style(log::Level::Warn)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
    let error_style = buf
        .default_level_style(log::Level::Error)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

    let level_style = match record.level() {
        log::Level::Info => info_style,
        log::Level::Warn => warn_style,
        log::Level::Error => error_style,
        _ => buf.default_level_style(record.level()),
    };
    let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

    // Windows 和 Unix 的路径分隔符都需要处理
    let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
    let line = record.line().unwrap_or(0);
    let time = chrono::Local::now().format("%H:%M:%S%.3f");
    let target = record.target();

    writeln!(
        buf,
        "{level_style}[{time}] {:<5}{level_style:#} {grey_style}[{target} {file}:{line}]{grey_style:#} {}",
        record.level(),
        record.args()
    )
}
