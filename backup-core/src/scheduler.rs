use crate::backup::BackupService;
use crate::constants::schedule;
use crate::error::{BackupError, Result};
use crate::metadata::BackupMetadata;
use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 备份频率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            other => Err(BackupError::InvalidSchedule(format!(
                "未知的备份频率: {other}（可选 daily / weekly）"
            ))),
        }
    }
}

/// 定时备份配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub frequency: Frequency,
    /// HH:MM，本地时间
    #[serde(default = "default_time")]
    pub time: String,
    /// 仅 weekly 使用
    #[serde(default)]
    pub day_of_week: Option<Weekday>,
}

fn default_time() -> String {
    schedule::DEFAULT_TIME.to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Daily,
            time: default_time(),
            day_of_week: None,
        }
    }
}

impl ScheduleConfig {
    pub fn daily(time: impl Into<String>) -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Daily,
            time: time.into(),
            day_of_week: None,
        }
    }

    pub fn weekly(day: Weekday, time: impl Into<String>) -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Weekly,
            time: time.into(),
            day_of_week: Some(day),
        }
    }

    /// 解析触发时刻
    pub fn trigger_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.time.trim(), "%H:%M").map_err(|e| {
            BackupError::InvalidSchedule(format!("时间格式应为 HH:MM: {} ({e})", self.time))
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.trigger_time()?;
        if self.frequency == Frequency::Weekly && self.day_of_week.is_none() {
            return Err(BackupError::InvalidSchedule(
                "每周备份必须指定星期".to_string(),
            ));
        }
        Ok(())
    }

    /// 当前分钟是否是触发时刻
    pub fn is_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        if !self.enabled {
            return false;
        }
        let Ok(trigger) = self.trigger_time() else {
            return false;
        };

        if now.hour() != trigger.hour() || now.minute() != trigger.minute() {
            return false;
        }

        match self.frequency {
            Frequency::Daily => true,
            Frequency::Weekly => self.day_of_week == Some(now.weekday()),
        }
    }
}

/// 一次 tick 的处理结果
#[derive(Debug)]
pub enum TickOutcome {
    Disabled,
    NotDue,
    /// 本分钟已经触发过
    AlreadyFired,
    InProgress,
    CoolingDown,
    /// 手动操作正在执行
    Busy,
    Triggered(BackupMetadata),
}

#[derive(Debug, Default)]
struct FireState {
    /// 上次触发所在的分钟（Unix 分钟数）
    last_fired_minute: Option<i64>,
    /// 冷却结束时刻（Unix 秒）
    cooldown_until: Option<i64>,
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    service: BackupService,
    config: RwLock<ScheduleConfig>,
    schedule_path: PathBuf,
    state: std::sync::Mutex<FireState>,
    in_progress: AtomicBool,
    cooldown: Duration,
    tick_period: Duration,
    running: Mutex<Option<RunningTask>>,
}

/// 定时备份调度器
///
/// 每分钟检查一次当前时间，命中配置的时刻时创建备份。
/// 同一分钟只触发一次；执行中或冷却期内不再触发。
#[derive(Clone)]
pub struct BackupScheduler {
    inner: Arc<SchedulerInner>,
}

impl BackupScheduler {
    pub fn new(service: BackupService, config: ScheduleConfig) -> Self {
        let schedule_path = service.backup_dir().join(schedule::SCHEDULE_FILE);
        Self {
            inner: Arc::new(SchedulerInner {
                service,
                config: RwLock::new(config),
                schedule_path,
                state: std::sync::Mutex::new(FireState::default()),
                in_progress: AtomicBool::new(false),
                cooldown: Duration::from_secs(schedule::DEFAULT_COOLDOWN_SECS as u64),
                tick_period: Duration::from_secs(schedule::TICK_INTERVAL_SECS),
                running: Mutex::new(None),
            }),
        }
    }

    /// 优先使用备份目录下已保存的 schedule.json，没有时使用传入的配置
    pub fn load(service: BackupService, fallback: ScheduleConfig) -> Result<Self> {
        let path = service.backup_dir().join(schedule::SCHEDULE_FILE);
        let config = if path.is_file() {
            let content = fs::read_to_string(&path)?;
            let saved: ScheduleConfig = serde_json::from_str(&content)?;
            saved.validate()?;
            debug!("加载已保存的定时配置: {}", path.display());
            saved
        } else {
            fallback
        };
        Ok(Self::new(service, config))
    }

    /// 修改冷却时间，需在启动前调用
    pub fn with_cooldown(self, cooldown: Duration) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.cooldown = cooldown;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                warn!("调度器已被共享，冷却时间保持不变");
                Self { inner }
            }
        }
    }

    pub async fn get_schedule(&self) -> ScheduleConfig {
        self.inner.config.read().await.clone()
    }

    /// 校验并保存新的定时配置，下一次 tick 生效
    pub async fn update_schedule(&self, config: ScheduleConfig) -> Result<()> {
        config.validate()?;

        let content = serde_json::to_string_pretty(&config)?;
        if let Some(parent) = self.inner.schedule_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::storage(parent, e))?;
        }
        fs::write(&self.inner.schedule_path, content)?;

        *self.inner.config.write().await = config.clone();
        info!(
            "定时备份配置已更新: enabled={}, {} {}",
            config.enabled,
            config.frequency.as_str(),
            config.time
        );
        Ok(())
    }

    /// 按给定时间检查一次是否需要备份
    pub async fn tick<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Result<TickOutcome> {
        let config = self.get_schedule().await;
        if !config.enabled {
            return Ok(TickOutcome::Disabled);
        }
        if !config.is_due(&now) {
            return Ok(TickOutcome::NotDue);
        }

        let now_secs = now.timestamp();
        let minute = now_secs.div_euclid(60);
        {
            let state = self.lock_state();
            if state.last_fired_minute == Some(minute) {
                return Ok(TickOutcome::AlreadyFired);
            }
            if state.cooldown_until.is_some_and(|until| now_secs < until) {
                debug!("仍在冷却期内，跳过本次定时备份");
                return Ok(TickOutcome::CoolingDown);
            }
        }

        if self
            .inner
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(TickOutcome::InProgress);
        }
        let _flag = InProgressFlag(&self.inner.in_progress);

        self.lock_state().last_fired_minute = Some(minute);
        info!("到达定时备份时间 {}，开始备份", config.time);

        let started = Instant::now();
        let result = self.inner.service.try_create_backup().await;
        let elapsed = started.elapsed();

        let finished_secs = now_secs + elapsed.as_secs() as i64;
        self.lock_state().cooldown_until = Some(finished_secs + self.inner.cooldown.as_secs() as i64);

        match result? {
            Some(metadata) => Ok(TickOutcome::Triggered(metadata)),
            None => Ok(TickOutcome::Busy),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FireState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 启动后台轮询；已在运行时返回 false
    pub async fn start(&self) -> bool {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            info!("定时备份已在运行，忽略重复启动");
            return false;
        }

        let token = CancellationToken::new();
        let scheduler = self.clone();
        let child = token.clone();
        let handle = tokio::spawn(async move { scheduler.run_loop(child).await });

        *running = Some(RunningTask { token, handle });
        info!("定时备份已启动");
        true
    }

    /// 停止后台轮询；未运行时返回 false
    pub async fn stop(&self) -> bool {
        let Some(task) = self.inner.running.lock().await.take() else {
            debug!("定时备份未在运行");
            return false;
        };

        task.token.cancel();
        if let Err(e) = task.handle.await {
            warn!("定时任务退出异常: {}", e);
        }
        info!("定时备份已停止");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    async fn run_loop(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick(Local::now()).await {
                        Ok(TickOutcome::Triggered(metadata)) => {
                            info!("定时备份完成: {}", metadata.id);
                        }
                        Ok(outcome) => debug!("定时检查: {:?}", outcome),
                        Err(e) => error!("定时备份失败: {}", e),
                    }
                }
            }
        }
    }
}

/// 离开作用域时清除执行中标记
struct InProgressFlag<'a>(&'a AtomicBool);

impl Drop for InProgressFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
