use crate::frame_graph::FgConfigError;

/// FrameGraph 的默认配置
pub struct DefaultFrameGraphSettings;
impl DefaultFrameGraphSettings {
    /// 同时在 GPU 上飞行的帧数（三缓冲）
    pub const FRAMES_IN_FLIGHT: u64 = 3;
    /// 两次评估之间，降级分配达到该数量即视为内存压力
    pub const PRESSURE_FALLBACK_THRESHOLD: u64 = 4;
    pub const MAX_EVICTIONS_PER_FRAME: usize = 8;
    pub const TELEMETRY_HISTORY: usize = 256;
}

/// FrameGraph 配置
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameGraphSettings {
    /// 为 true 时，任何环都会让 compile 失败，而不是做部分编译
    pub cycles_are_fatal: bool,
    /// 被驱逐资源的内存延迟多少帧释放
    pub frames_in_flight: u64,
    /// 降级分配累计达到该值时自动进入内存压力状态
    pub pressure_fallback_threshold: u64,
    /// 单次 reset 最多驱逐的资源数
    pub max_evictions_per_frame: usize,
    /// 遥测事件环形缓冲的容量
    pub telemetry_history: usize,
    /// 每次 compile 成功后打印执行计划
    pub log_execution_plan: bool,
}

impl Default for FrameGraphSettings {
    fn default() -> Self {
        Self {
            cycles_are_fatal: false,
            frames_in_flight: DefaultFrameGraphSettings::FRAMES_IN_FLIGHT,
            pressure_fallback_threshold: DefaultFrameGraphSettings::PRESSURE_FALLBACK_THRESHOLD,
            max_evictions_per_frame: DefaultFrameGraphSettings::MAX_EVICTIONS_PER_FRAME,
            telemetry_history: DefaultFrameGraphSettings::TELEMETRY_HISTORY,
            log_execution_plan: false,
        }
    }
}

// builder
impl FrameGraphSettings {
    #[inline]
    pub fn with_cycles_are_fatal(mut self, fatal: bool) -> Self {
        self.cycles_are_fatal = fatal;
        self
    }

    #[inline]
    pub fn with_frames_in_flight(mut self, frames: u64) -> Self {
        self.frames_in_flight = frames;
        self
    }

    #[inline]
    pub fn with_pressure_fallback_threshold(mut self, threshold: u64) -> Self {
        self.pressure_fallback_threshold = threshold;
        self
    }

    #[inline]
    pub fn with_max_evictions_per_frame(mut self, max: usize) -> Self {
        self.max_evictions_per_frame = max;
        self
    }

    #[inline]
    pub fn with_telemetry_history(mut self, capacity: usize) -> Self {
        self.telemetry_history = capacity;
        self
    }

    #[inline]
    pub fn with_log_execution_plan(mut self, enabled: bool) -> Self {
        self.log_execution_plan = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), FgConfigError> {
        if self.frames_in_flight == 0 {
            return Err(FgConfigError::InvalidSettings("frames_in_flight must be at least 1".into()));
        }
        if self.pressure_fallback_threshold == 0 {
            return Err(FgConfigError::InvalidSettings("pressure_fallback_threshold must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = FrameGraphSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.frames_in_flight, 3);
        assert!(!settings.cycles_are_fatal);
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let settings = FrameGraphSettings::default().with_frames_in_flight(0);
        assert!(matches!(settings.validate(), Err(FgConfigError::InvalidSettings(_))));
    }
}
