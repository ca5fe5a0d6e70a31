use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use tracing::level_filters::LevelFilter;

use crate::store::MAX_INSERT_ROWS;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "8080")]
    pub port: u16,

    /// Upper bound on how long a single-event submit may wait for its outcome.
    #[envconfig(default = "200ms")]
    pub request_timeout: EnvDuration,

    pub database_url: String,

    #[envconfig(default = "20")]
    pub db_max_conns: u32,

    #[envconfig(default = "5")]
    pub db_min_conns: u32,

    #[envconfig(default = "2m")]
    pub db_max_conn_idle_time: EnvDuration,

    #[envconfig(default = "30m")]
    pub db_max_conn_lifetime: EnvDuration,

    #[envconfig(default = "30s")]
    pub db_healthcheck_period: EnvDuration,

    #[envconfig(default = "3s")]
    pub db_connect_timeout: EnvDuration,

    /// Maximum time the writer delays a non-empty, non-full batch.
    #[envconfig(default = "2ms")]
    pub writer_batch_window: EnvDuration,

    #[envconfig(default = "800")]
    pub writer_max_batch: usize,

    #[envconfig(default = "50000")]
    pub writer_queue_size: usize,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "INFO")]
    pub log_level: LogLevel,
}

impl Config {
    /// Cross-field checks envconfig cannot express. Failures are fatal at startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("PORT must be between 1 and 65535".into());
        }
        if self.request_timeout.is_zero() {
            return Err("REQUEST_TIMEOUT must be > 0".into());
        }
        if self.db_max_conns == 0 {
            return Err("DB_MAX_CONNS must be > 0".into());
        }
        if self.db_min_conns > self.db_max_conns {
            return Err(format!(
                "DB_MIN_CONNS must be <= DB_MAX_CONNS (min={} max={})",
                self.db_min_conns, self.db_max_conns
            ));
        }
        if self.db_healthcheck_period.is_zero() {
            return Err("DB_HEALTHCHECK_PERIOD must be > 0".into());
        }
        if self.db_connect_timeout.is_zero() {
            return Err("DB_CONNECT_TIMEOUT must be > 0".into());
        }
        if self.writer_batch_window.is_zero() {
            return Err("WRITER_BATCH_WINDOW must be > 0".into());
        }
        if self.writer_max_batch == 0 || self.writer_max_batch > MAX_INSERT_ROWS {
            return Err(format!(
                "WRITER_MAX_BATCH must be between 1 and {MAX_INSERT_ROWS} (got {})",
                self.writer_max_batch
            ));
        }
        if self.writer_queue_size == 0 {
            return Err("WRITER_QUEUE_SIZE must be > 0".into());
        }
        Ok(())
    }
}

/// Duration in env-var suffix form: one or more `<integer><unit>` segments,
/// e.g. `200ms`, `2s`, `1m30s`. Units: ns, us, ms, s, m, h.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvDuration(Duration);

impl EnvDuration {
    pub fn duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for EnvDuration {
    fn from(d: Duration) -> Self {
        EnvDuration(d)
    }
}

impl FromStr for EnvDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration".into());
        }

        let mut total = Duration::ZERO;
        let mut rest = s;
        while !rest.is_empty() {
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| format!("missing unit in duration {s:?} (e.g. 200ms, 2s, 1m)"))?;
            if digits_end == 0 {
                return Err(format!("invalid duration {s:?} (e.g. 200ms, 2s, 1m)"));
            }
            let value: u64 = rest[..digits_end]
                .parse()
                .map_err(|_| format!("invalid duration {s:?}"))?;
            rest = &rest[digits_end..];

            let unit_end = rest
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len());
            let unit = &rest[..unit_end];
            rest = &rest[unit_end..];

            let segment = match unit {
                "ns" => Duration::from_nanos(value),
                "us" => Duration::from_micros(value),
                "ms" => Duration::from_millis(value),
                "s" => Duration::from_secs(value),
                "m" => Duration::from_secs(value * 60),
                "h" => Duration::from_secs(value * 3600),
                _ => return Err(format!("unknown duration unit {unit:?} in {s:?}")),
            };
            total += segment;
        }

        Ok(EnvDuration(total))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
    Fatal,
    Off,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Info => LevelFilter::INFO,
            // tracing has no FATAL; ERROR is the closest severity floor
            LogLevel::Error | LogLevel::Fatal => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "" | "INFO" => Ok(LogLevel::Info),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            "OFF" => Ok(LogLevel::Off),
            _ => Err(format!(
                "invalid log level {s:?} (allowed: INFO, ERROR, FATAL, OFF)"
            )),
        }
    }
}
